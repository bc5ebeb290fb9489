use std::sync::Arc;

use ocb_core::{
    config::Config,
    ocr::{OcrEngine, OcrEngines, TesseractEngine},
};
use ocb_ocrws::OcrWebServiceClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ocb_core::Error> {
    ocb_core::logging::init("ocb")?;

    let cfg = Arc::new(Config::load()?);

    let local: Arc<dyn OcrEngine> = Arc::new(TesseractEngine::new(
        cfg.tesseract_path.clone(),
        cfg.ocr_language.clone(),
        cfg.ocr_timeout,
    ));
    let online: Option<Arc<dyn OcrEngine>> = match &cfg.ocrws {
        Some(ws) => {
            info!(api_url = %ws.api_url, "online OCR enabled");
            Some(Arc::new(OcrWebServiceClient::new(ws.clone(), cfg.ocr_timeout)?))
        }
        None => None,
    };

    ocb_telegram::router::run_polling(cfg, OcrEngines::new(local, online))
        .await
        .map_err(|e| ocb_core::Error::External(format!("telegram bot failed: {e}")))?;

    Ok(())
}

//! OCRWebService adapter (online OCR).
//!
//! Uploads one image per request to the `processDocument` REST endpoint and
//! reads the recognized text from the JSON response.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use ocb_core::{config::OcrWsConfig, errors::Error, ocr::OcrEngine, Result};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Clone, Debug)]
pub struct OcrWebServiceClient {
    cfg: OcrWsConfig,
    http: reqwest::Client,
}

impl OcrWebServiceClient {
    pub fn new(cfg: OcrWsConfig, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::External(format!("ocrws client build error: {e}")))?;
        Ok(Self { cfg, http })
    }
}

#[async_trait]
impl OcrEngine for OcrWebServiceClient {
    fn name(&self) -> &'static str {
        "ocrwebservice"
    }

    async fn recognize(&self, image: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image).await.map_err(Error::Io)?;
        let file_name = image
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("image.png")
            .to_string();

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name));

        let resp = self
            .http
            .post(&self.cfg.api_url)
            .basic_auth(&self.cfg.username, Some(&self.cfg.license_key))
            .query(&[
                ("language", self.cfg.language.as_str()),
                ("gettext", "true"),
                ("outputformat", "txt"),
            ])
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Ocr(format!("online OCR request failed: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Ocr(format!("online OCR response error: {e}")))?;

        let text = parse_response(status, &body)?;
        debug!(image = %image.display(), chars = text.len(), "ocrwebservice finished");
        Ok(text)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ProcessDocumentResponse {
    #[serde(rename = "ErrorMessage", default)]
    error_message: Option<String>,
    /// Zones of pages of text.
    #[serde(rename = "OCRText", default)]
    ocr_text: Option<Vec<Vec<Option<String>>>>,
    #[serde(rename = "OutputFileUrl", default)]
    output_file_url: Option<String>,
}

/// Map an HTTP status and body to recognized text or an OCR error.
fn parse_response(status: u16, body: &str) -> Result<String> {
    match status {
        200..=299 => {}
        400 => {
            warn!("ocrwebservice bad request: {}", snippet(body));
            return Err(Error::Ocr(
                "bad OCR request (check file format or params)".to_string(),
            ));
        }
        401 => {
            return Err(Error::Ocr(
                "invalid OCRWebService credentials".to_string(),
            ))
        }
        402 => {
            return Err(Error::Ocr(
                "payment required or quota exceeded on OCRWebService account".to_string(),
            ))
        }
        500..=u16::MAX => {
            return Err(Error::Ocr(
                "OCRWebService internal error, please try later".to_string(),
            ))
        }
        other => {
            return Err(Error::Ocr(format!(
                "OCRWebService returned HTTP {other}: {}",
                snippet(body)
            )))
        }
    }

    let parsed: ProcessDocumentResponse = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            // Some accounts are configured to answer with the plain text result.
            warn!("could not parse ocrwebservice JSON: {e}");
            return Ok(body.trim().to_string());
        }
    };

    if let Some(msg) = parsed.error_message.filter(|m| !m.trim().is_empty()) {
        return Err(Error::Ocr(format!("OCRWebService: {}", snippet(&msg))));
    }

    let text = parsed
        .ocr_text
        .iter()
        .flatten()
        .flatten()
        .flatten()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    if text.is_empty() {
        if let Some(url) = parsed.output_file_url.filter(|u| !u.trim().is_empty()) {
            return Ok(format!("Result file: {url}"));
        }
    }
    Ok(text)
}

fn snippet(s: &str) -> String {
    s.trim().chars().take(200).collect()
}

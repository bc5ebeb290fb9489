//! OCR port and the local Tesseract engine.
//!
//! The job pipeline only depends on the [`OcrEngine`] contract: given an image
//! on disk, return the recognized text or fail. The online engine lives in the
//! `ocb-ocrws` adapter crate.

use std::{fmt, path::Path, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::{errors::Error, Result};

/// Which engine a chat wants its images recognized with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OcrMode {
    /// Tesseract on this host.
    #[default]
    Local,
    /// OCRWebService REST API.
    Online,
}

impl OcrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Online => "online",
        }
    }

    pub fn engine_label(self) -> &'static str {
        match self {
            Self::Local => "Tesseract (local)",
            Self::Online => "OCRWebService (online)",
        }
    }
}

impl fmt::Display for OcrMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OcrMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "online" => Ok(Self::Online),
            other => Err(Error::Config(format!(
                "unknown OCR mode '{other}' (expected local or online)"
            ))),
        }
    }
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Recognize text in a single image. Empty text is a valid result.
    async fn recognize(&self, image: &Path) -> Result<String>;
}

/// Engines available to the bot, one per [`OcrMode`].
#[derive(Clone)]
pub struct OcrEngines {
    local: Arc<dyn OcrEngine>,
    online: Option<Arc<dyn OcrEngine>>,
}

impl OcrEngines {
    pub fn new(local: Arc<dyn OcrEngine>, online: Option<Arc<dyn OcrEngine>>) -> Self {
        Self { local, online }
    }

    pub fn supports(&self, mode: OcrMode) -> bool {
        match mode {
            OcrMode::Local => true,
            OcrMode::Online => self.online.is_some(),
        }
    }

    pub fn for_mode(&self, mode: OcrMode) -> Result<Arc<dyn OcrEngine>> {
        match mode {
            OcrMode::Local => Ok(self.local.clone()),
            OcrMode::Online => self.online.clone().ok_or_else(|| {
                Error::Config("online OCR is not configured (OCRWS_USERNAME / OCRWS_LICENSE_KEY)".to_string())
            }),
        }
    }
}

/// Runs the `tesseract` binary: `tesseract <image> stdout -l <lang>`.
#[derive(Clone, Debug)]
pub struct TesseractEngine {
    binary: PathBuf,
    language: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
            timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    fn name(&self) -> &'static str {
        "tesseract"
    }

    async fn recognize(&self, image: &Path) -> Result<String> {
        let child = Command::new(&self.binary)
            .arg(image)
            .arg("stdout")
            .args(["-l", &self.language])
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Ocr(format!(
                    "{} not found (install tesseract-ocr)",
                    self.binary.display()
                )));
            }
            Ok(Err(e)) => return Err(Error::Io(e)),
            Err(_) => {
                return Err(Error::Ocr(format!(
                    "tesseract timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Ocr(format!(
                "tesseract failed: {}",
                stderr.trim().chars().take(200).collect::<String>()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(image = %image.display(), chars = text.len(), "tesseract finished");
        Ok(text)
    }
}

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{archive::ExtractLimits, errors::Error, ocr::OcrMode, Result};

pub const DEFAULT_OCRWS_API_URL: &str = "https://www.ocrwebservice.com/restservices/processDocument";

/// Credentials for the online OCR engine (OCRWebService).
#[derive(Clone, Debug)]
pub struct OcrWsConfig {
    pub username: String,
    pub license_key: String,
    pub api_url: String,
    pub language: String,
}

/// Typed configuration, read once at startup from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    /// Empty means the bot is open to everyone.
    pub telegram_allowed_users: Vec<i64>,

    // Jobs
    pub work_dir: PathBuf,
    pub job_queue_capacity: usize,
    pub job_workers: usize,
    pub max_upload_bytes: u64,
    pub extract_limits: ExtractLimits,

    // OCR
    pub default_ocr_mode: OcrMode,
    pub tesseract_path: PathBuf,
    pub ocr_language: String,
    pub ocr_timeout: Duration,
    pub ocrws: Option<OcrWsConfig>,

    // Delivery
    pub telegram_safe_limit: usize,
    pub send_summary_document: bool,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let telegram_bot_token = env_str("BOT_TOKEN")
            .and_then(non_empty)
            .or_else(|| env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty))
            .ok_or_else(|| {
                Error::Config("BOT_TOKEN environment variable is required".to_string())
            })?;
        let telegram_allowed_users = parse_csv_i64(env_str("TELEGRAM_ALLOWED_USERS"));

        let work_dir = env_path("WORK_DIR").unwrap_or_else(|| env::temp_dir().join("ocr-bot"));
        fs::create_dir_all(&work_dir)?;

        let job_queue_capacity = env_usize("JOB_QUEUE_CAPACITY").unwrap_or(16).max(1);
        let job_workers = env_usize("JOB_WORKERS").unwrap_or(1).max(1);
        let max_upload_bytes = env_u64("MAX_UPLOAD_BYTES").unwrap_or(20 * 1024 * 1024);

        let defaults = ExtractLimits::default();
        let extract_limits = ExtractLimits {
            max_files: env_usize("MAX_ARCHIVE_FILES").unwrap_or(defaults.max_files),
            max_file_bytes: env_u64("MAX_ARCHIVE_FILE_BYTES").unwrap_or(defaults.max_file_bytes),
            max_total_bytes: env_u64("MAX_ARCHIVE_TOTAL_BYTES")
                .unwrap_or(defaults.max_total_bytes),
        };

        let default_ocr_mode = env_str("DEFAULT_OCR_MODE")
            .and_then(|s| s.parse::<OcrMode>().ok())
            .unwrap_or(OcrMode::Local);
        let tesseract_path = env_path("TESSERACT_PATH").unwrap_or_else(|| "tesseract".into());
        let ocr_language = env_str("OCR_LANGUAGE")
            .and_then(non_empty)
            .unwrap_or_else(|| "eng".to_string());
        let ocr_timeout = Duration::from_secs(env_u64("OCR_TIMEOUT_SECS").unwrap_or(120).max(1));

        let ocrws = match (
            env_str("OCRWS_USERNAME").and_then(non_empty),
            env_str("OCRWS_LICENSE_KEY").and_then(non_empty),
        ) {
            (Some(username), Some(license_key)) => Some(OcrWsConfig {
                username,
                license_key,
                api_url: env_str("OCRWS_API_URL")
                    .and_then(non_empty)
                    .unwrap_or_else(|| DEFAULT_OCRWS_API_URL.to_string()),
                language: env_str("OCRWS_LANGUAGE")
                    .and_then(non_empty)
                    .unwrap_or_else(|| "english".to_string()),
            }),
            _ => None,
        };

        if default_ocr_mode == OcrMode::Online && ocrws.is_none() {
            return Err(Error::Config(
                "DEFAULT_OCR_MODE=online requires OCRWS_USERNAME and OCRWS_LICENSE_KEY"
                    .to_string(),
            ));
        }

        let telegram_safe_limit = env_usize("TELEGRAM_SAFE_LIMIT").unwrap_or(4000).clamp(200, 4096);
        let send_summary_document = env_bool("SEND_SUMMARY_DOCUMENT").unwrap_or(true);

        let audit_log_path = env_path("AUDIT_LOG_PATH")
            .unwrap_or_else(|| env::temp_dir().join("ocr-bot-audit.log"));
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            telegram_allowed_users,
            work_dir,
            job_queue_capacity,
            job_workers,
            max_upload_bytes,
            extract_limits,
            default_ocr_mode,
            tesseract_path,
            ocr_language,
            ocr_timeout,
            ocrws,
            telegram_safe_limit,
            send_summary_document,
            audit_log_path,
            audit_log_json,
        })
    }

    /// Allow-list check. An empty allow list admits everyone.
    pub fn is_user_allowed(&self, user_id: Option<i64>) -> bool {
        if self.telegram_allowed_users.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.telegram_allowed_users.contains(&id))
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim().trim_start_matches("export ").trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
pub(crate) fn test_config(work_dir: &Path) -> Config {
    Config {
        telegram_bot_token: "x".to_string(),
        telegram_allowed_users: vec![],
        work_dir: work_dir.to_path_buf(),
        job_queue_capacity: 4,
        job_workers: 1,
        max_upload_bytes: 20 * 1024 * 1024,
        extract_limits: ExtractLimits::default(),
        default_ocr_mode: OcrMode::Local,
        tesseract_path: "tesseract".into(),
        ocr_language: "eng".to_string(),
        ocr_timeout: Duration::from_secs(5),
        ocrws: None,
        telegram_safe_limit: 4000,
        send_summary_document: true,
        audit_log_path: work_dir.join("audit.log"),
        audit_log_json: true,
    }
}

/// Core error type for the bot.
///
/// Adapter crates map their specific errors into this type so the job
/// pipeline can handle failures consistently (user-facing message vs log only).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported archive type: {0}")]
    UnsupportedArchive(String),

    #[error("upload too large: {size} bytes (max {max})")]
    UploadTooLarge { size: u64, max: u64 },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("ocr error: {0}")]
    Ocr(String),

    #[error("job queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Short text that is safe to show to a Telegram user.
    pub fn user_message(&self) -> String {
        let s = match self {
            Error::Io(_) => "file system error".to_string(),
            Error::Json(_) => "malformed response".to_string(),
            other => other.to_string(),
        };
        s.chars().take(200).collect()
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_hides_io_details() {
        let e = Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "/home/bot/secret/path",
        ));
        assert_eq!(e.user_message(), "file system error");
    }

    #[test]
    fn user_message_is_bounded() {
        let e = Error::Archive("x".repeat(1000));
        assert_eq!(e.user_message().chars().count(), 200);
    }
}

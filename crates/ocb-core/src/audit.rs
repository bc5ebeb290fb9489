use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{
    domain::{ChatId, JobId, UserId},
    errors::Error,
    job::JobOutcome,
    Result,
};

const AUDIT_MAX_TEXT: usize = 500;

/// RFC3339 timestamp in UTC.
pub fn iso_timestamp_utc() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<u64>,
    pub chat_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_pages: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    fn base(event: &str, chat_id: ChatId) -> Self {
        Self {
            timestamp: iso_timestamp_utc(),
            event: event.to_string(),
            job_id: None,
            chat_id: chat_id.0,
            user_id: None,
            username: None,
            file_name: None,
            outcome: None,
            pages: None,
            failed_pages: None,
            reason: None,
            error: None,
        }
    }

    pub fn job_queued(
        job_id: JobId,
        chat_id: ChatId,
        user_id: UserId,
        username: &str,
        file_name: &str,
    ) -> Self {
        Self {
            job_id: Some(job_id.0),
            user_id: Some(user_id.0),
            username: Some(username.to_string()),
            file_name: Some(file_name.to_string()),
            ..Self::base("job_queued", chat_id)
        }
    }

    pub fn job_finished(
        job_id: JobId,
        chat_id: ChatId,
        user_id: UserId,
        username: &str,
        file_name: &str,
        outcome: &JobOutcome,
    ) -> Self {
        let event = if outcome.is_success() {
            "job_completed"
        } else {
            "job_failed"
        };
        let (pages, failed_pages) = match outcome {
            JobOutcome::Completed {
                pages,
                failed_pages,
            } => (Some(*pages), Some(*failed_pages)),
            _ => (None, None),
        };
        Self {
            job_id: Some(job_id.0),
            user_id: Some(user_id.0),
            username: Some(username.to_string()),
            file_name: Some(file_name.to_string()),
            outcome: Some(outcome.label().to_string()),
            pages,
            failed_pages,
            error: outcome.error().map(|s| s.to_string()),
            ..Self::base(event, chat_id)
        }
    }

    pub fn rejected(
        chat_id: ChatId,
        user_id: Option<UserId>,
        file_name: Option<&str>,
        reason: &str,
    ) -> Self {
        Self {
            user_id: user_id.map(|u| u.0),
            file_name: file_name.map(|s| s.to_string()),
            reason: Some(reason.to_string()),
            ..Self::base("rejected", chat_id)
        }
    }
}

/// Append-only audit trail (plain text blocks or JSON lines).
#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        for field in [&mut event.file_name, &mut event.reason, &mut event.error] {
            if let Some(s) = field.take() {
                *field = Some(truncate_text(&s, AUDIT_MAX_TEXT));
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_text_adds_ellipsis() {
        let s = "a".repeat(AUDIT_MAX_TEXT + 10);
        let t = truncate_text(&s, AUDIT_MAX_TEXT);
        assert!(t.ends_with("..."));
        assert_eq!(t.chars().count(), AUDIT_MAX_TEXT + 3);
        assert_eq!(truncate_text("short", 10), "short");
    }

    #[test]
    fn json_lines_carry_outcome_fields() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);
        log.write(AuditEvent::job_finished(
            JobId(7),
            ChatId(1),
            UserId(2),
            "alice",
            "photos.zip",
            &JobOutcome::Completed {
                pages: 3,
                failed_pages: 1,
            },
        ))
        .unwrap();
        log.write(AuditEvent::job_finished(
            JobId(8),
            ChatId(1),
            UserId(2),
            "alice",
            "bad.zip",
            &JobOutcome::ExtractionFailed("x".repeat(AUDIT_MAX_TEXT + 1)),
        ))
        .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "job_completed");
        assert_eq!(lines[0]["username"], "alice");
        assert_eq!(lines[0]["pages"], 3);
        assert_eq!(lines[0]["failed_pages"], 1);
        assert_eq!(lines[1]["event"], "job_failed");
        assert_eq!(lines[1]["outcome"], "extraction_failed");
        assert!(lines[1]["error"].as_str().unwrap().ends_with("..."));
    }

    #[test]
    fn plain_text_format_is_readable() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);
        log.write(AuditEvent::rejected(
            ChatId(5),
            Some(UserId(6)),
            Some("notes.pdf"),
            "unsupported",
        ))
        .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: rejected"));
        assert!(written.contains("file_name: notes.pdf"));
        assert!(written.contains("chat_id: 5"));
    }
}

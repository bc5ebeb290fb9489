//! Upload validation and queue submission.
//!
//! Validation happens before anything touches the disk; a submission that
//! reaches the queue owns a workspace holding the downloaded upload.

use std::sync::Arc;

use tracing::{info, warn};

use crate::{
    archive::{ArchiveKind, SUPPORTED_EXTENSIONS},
    audit::{AuditEvent, AuditLogger},
    domain::{ChatId, UserId},
    errors::Error,
    formatting::escape_html,
    images::has_image_extension,
    job::{JobInput, NewJob},
    messaging::port::MessagingPort,
    queue::{JobQueue, Submitted},
    settings::ChatSettings,
    workspace::Workspace,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UploadKind {
    Archive(ArchiveKind),
    Image,
}

/// Decide whether an uploaded document becomes a job.
///
/// Rejections carry no side effects: callers create the job workspace only
/// after this returns `Ok`.
pub fn classify_upload(file_name: &str, size: u64, max_bytes: u64) -> Result<UploadKind> {
    let kind = if let Some(kind) = ArchiveKind::detect(file_name) {
        UploadKind::Archive(kind)
    } else if has_image_extension(std::path::Path::new(file_name.trim())) {
        UploadKind::Image
    } else {
        return Err(Error::UnsupportedArchive(file_name.to_string()));
    };

    if size > max_bytes {
        return Err(Error::UploadTooLarge {
            size,
            max: max_bytes,
        });
    }
    Ok(kind)
}

/// Who sent an upload.
#[derive(Clone, Debug)]
pub struct Sender {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
}

/// A downloaded upload, ready to become a job.
#[derive(Debug)]
pub struct Submission {
    pub sender: Sender,
    pub file_name: String,
    pub input: JobInput,
    pub workspace: Workspace,
}

/// Turns accepted uploads into queued jobs and tells the user what happened.
pub struct Intake {
    messenger: Arc<dyn MessagingPort>,
    queue: JobQueue,
    settings: Arc<ChatSettings>,
    audit: Option<Arc<AuditLogger>>,
}

impl Intake {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        queue: JobQueue,
        settings: Arc<ChatSettings>,
        audit: Option<Arc<AuditLogger>>,
    ) -> Self {
        Self {
            messenger,
            queue,
            settings,
            audit,
        }
    }

    /// Acknowledge the upload and enqueue it.
    ///
    /// The acknowledgement becomes the job's status message. When the queue
    /// is full it is turned into a "busy" reply and the workspace is removed.
    pub async fn submit(&self, sub: Submission) -> Result<Submitted> {
        let Submission {
            sender,
            file_name,
            input,
            workspace,
        } = sub;
        let mode = self.settings.ocr_mode(sender.chat_id).await;

        let (pending, running) = (self.queue.pending(), self.queue.running());
        let when = if pending == 0 && running < self.queue.config().workers {
            "starting shortly".to_string()
        } else {
            format!("{} job(s) ahead", pending + running)
        };
        let ack = format!(
            "📥 Received <b>{}</b>. {} OCR, {when}.",
            escape_html(&file_name),
            mode.as_str().to_uppercase()
        );
        let status = match self.messenger.send_html(sender.chat_id, &ack).await {
            Ok(m) => Some(m),
            Err(e) => {
                warn!(chat_id = sender.chat_id.0, "failed to acknowledge upload: {e}");
                None
            }
        };

        let new_job = NewJob {
            chat_id: sender.chat_id,
            user_id: sender.user_id,
            username: sender.username.clone(),
            file_name: file_name.clone(),
            input,
            mode,
            status,
            workspace,
        };

        match self.queue.try_submit(new_job) {
            Ok(submitted) => {
                info!(
                    job_id = %submitted.id,
                    chat_id = sender.chat_id.0,
                    file = %file_name,
                    position = submitted.position,
                    "job queued"
                );
                self.audit(AuditEvent::job_queued(
                    submitted.id,
                    sender.chat_id,
                    sender.user_id,
                    &sender.username,
                    &file_name,
                ));
                Ok(submitted)
            }
            Err(e) => {
                let reply = match &e {
                    Error::QueueFull { capacity } => format!(
                        "⏳ Busy: {capacity} job(s) are already waiting. Please try again later."
                    ),
                    other => format!("❌ {}", escape_html(&other.user_message())),
                };
                let edited = match status {
                    Some(st) => self.messenger.edit_html(st, &reply).await.is_ok(),
                    None => false,
                };
                if !edited {
                    let _ = self.messenger.send_html(sender.chat_id, &reply).await;
                }
                self.audit(AuditEvent::rejected(
                    sender.chat_id,
                    Some(sender.user_id),
                    Some(&file_name),
                    &e.to_string(),
                ));
                Err(e)
            }
        }
    }

    /// Reply to an upload that failed validation. Nothing is queued.
    pub async fn reject(&self, sender: &Sender, file_name: Option<&str>, err: &Error) {
        let reply = rejection_message(err);
        if let Err(e) = self.messenger.send_html(sender.chat_id, &reply).await {
            warn!(chat_id = sender.chat_id.0, "failed to send rejection: {e}");
        }
        info!(chat_id = sender.chat_id.0, file = ?file_name, "upload rejected: {err}");
        self.audit(AuditEvent::rejected(
            sender.chat_id,
            Some(sender.user_id),
            file_name,
            &err.to_string(),
        ));
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.write(event) {
                warn!("[AUDIT] failed to write event: {e}");
            }
        }
    }
}

/// User-facing text for a validation failure.
pub fn rejection_message(err: &Error) -> String {
    match err {
        Error::UnsupportedArchive(_) => format!(
            "❌ Unsupported file type. Send an archive ({}) or an image.",
            SUPPORTED_EXTENSIONS.join(", ")
        ),
        Error::UploadTooLarge { size, max } => format!(
            "❌ File too large ({:.1} MB). Maximum is {:.1} MB.",
            *size as f64 / MB,
            *max as f64 / MB
        ),
        other => format!("❌ {}", escape_html(&other.user_message())),
    }
}

const MB: f64 = 1024.0 * 1024.0;

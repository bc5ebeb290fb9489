//! One user submission and its processing state.

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

use crate::{
    archive::ArchiveKind,
    domain::{ChatId, JobId, MessageRef, UserId},
    ocr::OcrMode,
    workspace::Workspace,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobInput {
    /// Uploaded archive stored inside the job workspace.
    Archive { path: PathBuf, kind: ArchiveKind },
    /// A single photo or image document.
    Image { path: PathBuf },
}

/// Everything intake knows about a submission before the queue accepts it.
#[derive(Debug)]
pub struct NewJob {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
    pub file_name: String,
    pub input: JobInput,
    pub mode: OcrMode,
    /// Acknowledgement message, edited with progress while the job runs.
    pub status: Option<MessageRef>,
    pub workspace: Workspace,
}

impl NewJob {
    pub fn into_job(self, id: JobId, cancel: CancellationToken) -> Job {
        Job {
            id,
            chat_id: self.chat_id,
            user_id: self.user_id,
            username: self.username,
            file_name: self.file_name,
            input: self.input,
            mode: self.mode,
            status: self.status,
            cancel,
            workspace: self.workspace,
        }
    }
}

/// A queued or running job. Dropping it removes its workspace.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub username: String,
    pub file_name: String,
    pub input: JobInput,
    pub mode: OcrMode,
    pub status: Option<MessageRef>,
    pub cancel: CancellationToken,
    pub workspace: Workspace,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PageOutcome {
    /// Recognized text; may be empty.
    Text(String),
    /// OCR failed for this page; user-safe reason.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageResult {
    pub name: String,
    pub outcome: PageOutcome,
}

impl PageResult {
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Text(t) => Some(t),
            PageOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PageOutcome::Failed(_))
    }
}

/// Terminal state of a job, used for logging and the audit trail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        pages: usize,
        failed_pages: usize,
    },
    NoImages,
    ExtractionFailed(String),
    EngineUnavailable(String),
    DeliveryFailed(String),
    Cancelled,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::NoImages)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::NoImages => "no_images",
            Self::ExtractionFailed(_) => "extraction_failed",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::DeliveryFailed(_) => "delivery_failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::ExtractionFailed(e) | Self::EngineUnavailable(e) | Self::DeliveryFailed(e) => {
                Some(e)
            }
            _ => None,
        }
    }
}

//! Extraction → OCR → delivery → cleanup for one job.

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::{
    archive::{safe_extract_archive, ExtractLimits},
    audit::{AuditEvent, AuditLogger},
    domain::ChatId,
    errors::Error,
    formatting::{
        build_summary_text, escape_html, format_page_message, progress_line, summary_file_name,
    },
    images::{page_name, select_images},
    job::{Job, JobInput, JobOutcome, PageOutcome, PageResult},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, OutgoingDocument},
    },
    ocr::{OcrEngine, OcrEngines},
    queue::JobRunner,
    Result,
};

/// Edit the status message at most every this many pages.
const PROGRESS_EVERY: usize = 5;

#[derive(Clone, Copy, Debug)]
pub struct ProcessorOptions {
    pub extract_limits: ExtractLimits,
    /// Max chars per page message.
    pub message_limit: usize,
    pub send_summary_document: bool,
}

pub struct JobProcessor {
    messenger: Arc<dyn MessagingPort>,
    engines: OcrEngines,
    audit: Option<Arc<AuditLogger>>,
    opts: ProcessorOptions,
}

/// Early exit from the pipeline. The user has already been notified.
struct Abort(JobOutcome);

impl JobProcessor {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        engines: OcrEngines,
        audit: Option<Arc<AuditLogger>>,
        opts: ProcessorOptions,
    ) -> Self {
        Self {
            messenger,
            engines,
            audit,
            opts,
        }
    }

    async fn process(&self, job: &Job) -> std::result::Result<JobOutcome, Abort> {
        if job.cancel.is_cancelled() {
            self.notify(job, "🛑 OCR cancelled.").await;
            return Err(Abort(JobOutcome::Cancelled));
        }

        let engine = match self.engines.for_mode(job.mode) {
            Ok(e) => e,
            Err(e) => {
                self.notify(job, &format!("❌ {}", escape_html(&e.user_message())))
                    .await;
                return Err(Abort(JobOutcome::EngineUnavailable(e.to_string())));
            }
        };

        let images = self.collect_images(job).await?;
        let pages = self.recognize_all(job, engine.as_ref(), &images).await?;
        self.deliver(job, &pages).await?;

        Ok(JobOutcome::Completed {
            pages: pages.len(),
            failed_pages: pages.iter().filter(|p| p.is_failed()).count(),
        })
    }

    /// Page images for the job, absolute paths in delivery order.
    async fn collect_images(&self, job: &Job) -> std::result::Result<Vec<(String, PathBuf)>, Abort> {
        let (path, kind) = match &job.input {
            JobInput::Image { path } => {
                return Ok(vec![(job.file_name.clone(), path.clone())]);
            }
            JobInput::Archive { path, kind } => (path.clone(), *kind),
        };

        self.set_status(
            job,
            &format!("📦 Extracting <b>{}</b>...", escape_html(&job.file_name)),
        )
        .await;

        let extract_dir = job.workspace.extract_dir();
        let limits = self.opts.extract_limits;
        let res = tokio::task::spawn_blocking({
            let extract_dir = extract_dir.clone();
            move || safe_extract_archive(&path, kind, &extract_dir, limits)
        })
        .await
        .map_err(|e| Error::External(format!("extraction task failed: {e}")))
        .and_then(|r| r);

        let report = match res {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = %job.id, "archive extraction failed: {e}");
                self.notify(
                    job,
                    &format!(
                        "❌ Error extracting archive: {}",
                        escape_html(&e.user_message())
                    ),
                )
                .await;
                return Err(Abort(JobOutcome::ExtractionFailed(e.to_string())));
            }
        };

        let images: Vec<(String, PathBuf)> = select_images(&report.extracted_files)
            .into_iter()
            .map(|rel| (page_name(&rel), extract_dir.join(rel)))
            .collect();

        if images.is_empty() {
            self.notify(job, "⚠️ No images found inside the archive.")
                .await;
            return Err(Abort(JobOutcome::NoImages));
        }

        info!(
            job_id = %job.id,
            kind = kind.label(),
            files = report.extracted_files.len(),
            images = images.len(),
            "archive expanded"
        );
        Ok(images)
    }

    async fn recognize_all(
        &self,
        job: &Job,
        engine: &dyn OcrEngine,
        images: &[(String, PathBuf)],
    ) -> std::result::Result<Vec<PageResult>, Abort> {
        let total = images.len();
        let mut pages = Vec::with_capacity(total);
        let _ = self
            .messenger
            .send_chat_action(job.chat_id, ChatAction::Typing)
            .await;

        for (idx, (name, path)) in images.iter().enumerate() {
            if job.cancel.is_cancelled() {
                self.notify(job, "🛑 OCR cancelled.").await;
                return Err(Abort(JobOutcome::Cancelled));
            }
            if idx % PROGRESS_EVERY == 0 {
                self.set_status(job, &progress_line(&job.file_name, idx, total))
                    .await;
            }

            let outcome = match engine.recognize(path).await {
                Ok(text) => PageOutcome::Text(text),
                Err(e) => {
                    warn!(job_id = %job.id, page = %name, engine = engine.name(), "ocr failed: {e}");
                    PageOutcome::Failed(e.user_message())
                }
            };
            pages.push(PageResult {
                name: name.clone(),
                outcome,
            });
        }

        Ok(pages)
    }

    async fn deliver(&self, job: &Job, pages: &[PageResult]) -> std::result::Result<(), Abort> {
        let caps = self.messenger.capabilities();
        let limit = self.opts.message_limit.min(caps.max_message_len);
        let total = pages.len();
        let mut any_truncated = false;

        for (idx, page) in pages.iter().enumerate() {
            let (html, truncated) = format_page_message(page, idx + 1, total, limit);
            any_truncated |= truncated;
            if let Err(e) = self.messenger.send_html(job.chat_id, &html).await {
                return Err(self.delivery_failed(job, e));
            }
        }

        let any_text = pages
            .iter()
            .any(|p| p.text().is_some_and(|t| !t.trim().is_empty()));
        let is_archive = matches!(job.input, JobInput::Archive { .. });
        let send_summary = caps.supports_documents
            && (any_truncated || (is_archive && self.opts.send_summary_document && any_text));

        if send_summary {
            let _ = self
                .messenger
                .send_chat_action(job.chat_id, ChatAction::UploadDocument)
                .await;
            let doc = OutgoingDocument {
                file_name: summary_file_name(&job.file_name),
                bytes: build_summary_text(pages).into_bytes(),
                caption: Some(format!(
                    "✅ OCR complete in <b>{}</b> mode.",
                    job.mode.as_str().to_uppercase()
                )),
            };
            if let Err(e) = self.messenger.send_document(job.chat_id, doc).await {
                return Err(self.delivery_failed(job, e));
            }
        }

        let failed = pages.iter().filter(|p| p.is_failed()).count();
        let done = if failed == 0 {
            format!(
                "✅ <b>{}</b>: {total} page(s) done.",
                escape_html(&job.file_name)
            )
        } else {
            format!(
                "✅ <b>{}</b>: {total} page(s) done, {failed} failed.",
                escape_html(&job.file_name)
            )
        };
        self.set_status(job, &done).await;
        Ok(())
    }

    fn delivery_failed(&self, job: &Job, e: Error) -> Abort {
        error!(job_id = %job.id, chat_id = job.chat_id.0, "delivery failed: {e}");
        Abort(JobOutcome::DeliveryFailed(e.to_string()))
    }

    /// Best-effort progress update on the job's status message.
    async fn set_status(&self, job: &Job, html: &str) {
        if !self.messenger.capabilities().supports_edit {
            return;
        }
        if let Some(status) = job.status {
            if let Err(e) = self.messenger.edit_html(status, html).await {
                warn!(job_id = %job.id, "status update failed: {e}");
            }
        }
    }

    /// Tell the user about a terminal condition with exactly one visible message:
    /// the status message turns into it, or a new message is sent.
    async fn notify(&self, job: &Job, html: &str) {
        if let Some(status) = job.status {
            if self.messenger.edit_html(status, html).await.is_ok() {
                return;
            }
        }
        if let Err(e) = self.send(job.chat_id, html).await {
            error!(job_id = %job.id, "failed to notify user: {e}");
        }
    }

    async fn send(&self, chat_id: ChatId, html: &str) -> Result<()> {
        self.messenger.send_html(chat_id, html).await.map(|_| ())
    }

    fn audit(&self, job: &Job, outcome: &JobOutcome) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.write(AuditEvent::job_finished(
            job.id,
            job.chat_id,
            job.user_id,
            &job.username,
            &job.file_name,
            outcome,
        )) {
            warn!("[AUDIT] failed to write job event: {e}");
        }
    }
}

#[async_trait]
impl JobRunner for JobProcessor {
    async fn run(&self, job: Job) -> JobOutcome {
        info!(
            job_id = %job.id,
            chat_id = job.chat_id.0,
            file = %job.file_name,
            mode = %job.mode,
            "job started"
        );

        let outcome = match self.process(&job).await {
            Ok(outcome) => outcome,
            Err(Abort(outcome)) => outcome,
        };
        self.audit(&job, &outcome);

        // Dropping the job removes its workspace.
        let workspace = job.workspace;
        if let Err(e) = workspace.close() {
            warn!(job_id = %job.id, "workspace cleanup failed: {e}");
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        archive::{
            tests::{write_7z, write_zip},
            ArchiveKind,
        },
        domain::{JobId, MessageId, MessageRef, UserId},
        job::NewJob,
        ocr::OcrMode,
        testing::FakeMessenger,
        workspace::Workspace,
    };
    use std::{path::Path, sync::Mutex};
    use tokio_util::sync::CancellationToken;

    /// "Recognizes" an image by returning its file contents; files containing
    /// `FAIL` error out.
    #[derive(Default)]
    struct EchoOcr {
        calls: Mutex<Vec<String>>,
    }

    impl EchoOcr {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OcrEngine for EchoOcr {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn recognize(&self, image: &Path) -> Result<String> {
            let name = image
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            self.calls.lock().unwrap().push(name);
            let text = std::fs::read_to_string(image)?;
            if text.contains("FAIL") {
                return Err(Error::Ocr("engine crashed".to_string()));
            }
            Ok(text)
        }
    }

    struct Harness {
        root: tempfile::TempDir,
        messenger: Arc<FakeMessenger>,
        ocr: Arc<EchoOcr>,
        processor: JobProcessor,
    }

    impl Harness {
        fn new(messenger: FakeMessenger) -> Self {
            Self::with_options(
                messenger,
                ProcessorOptions {
                    extract_limits: ExtractLimits::default(),
                    message_limit: 4000,
                    send_summary_document: true,
                },
            )
        }

        fn with_options(messenger: FakeMessenger, opts: ProcessorOptions) -> Self {
            let root = tempfile::tempdir().unwrap();
            let messenger = Arc::new(messenger);
            let ocr = Arc::new(EchoOcr::default());
            let audit = Arc::new(AuditLogger::new(root.path().join("audit.log"), true));
            let processor = JobProcessor::new(
                messenger.clone(),
                OcrEngines::new(ocr.clone(), None),
                Some(audit),
                opts,
            );
            Self {
                root,
                messenger,
                ocr,
                processor,
            }
        }

        fn work_root(&self) -> std::path::PathBuf {
            self.root.path().join("jobs")
        }

        /// Build a job whose upload is a zip with the given entries.
        fn zip_job(&self, file_name: &str, entries: &[(&str, &[u8])]) -> Job {
            let ws = Workspace::create(&self.work_root()).unwrap();
            let path = ws.upload_path(file_name);
            write_zip(&path, entries);
            self.job(file_name, ws, JobInput::Archive {
                path,
                kind: ArchiveKind::detect(file_name).unwrap(),
            })
        }

        fn sevenz_job(&self, file_name: &str, entries: &[(&str, &[u8])]) -> Job {
            let ws = Workspace::create(&self.work_root()).unwrap();
            let path = ws.upload_path(file_name);
            write_7z(&path, entries);
            self.job(file_name, ws, JobInput::Archive {
                path,
                kind: ArchiveKind::SevenZip,
            })
        }

        fn job(&self, file_name: &str, workspace: Workspace, input: JobInput) -> Job {
            NewJob {
                chat_id: ChatId(10),
                user_id: UserId(20),
                username: "tester".to_string(),
                file_name: file_name.to_string(),
                input,
                mode: OcrMode::Local,
                status: None,
                workspace,
            }
            .into_job(JobId(1), CancellationToken::new())
        }

        fn workspaces_left(&self) -> usize {
            std::fs::read_dir(self.work_root())
                .map(|rd| rd.count())
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn sevenz_archive_pages_arrive_in_order() {
        let h = Harness::new(FakeMessenger::default());
        let job = h.sevenz_job("photos.7z", &[("a.png", b"text a"), ("b.png", b"text b")]);
        let ws_path = job.workspace.path().to_path_buf();

        let outcome = h.processor.run(job).await;

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                pages: 2,
                failed_pages: 0
            }
        );
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("<b>a.png</b> (1/2)") && sent[0].contains("text a"));
        assert!(sent[1].contains("<b>b.png</b> (2/2)") && sent[1].contains("text b"));
        assert_eq!(h.ocr.calls(), vec!["a.png", "b.png"]);
        assert!(!ws_path.exists());
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn delivers_one_message_per_image_in_archive_order() {
        let h = Harness::new(FakeMessenger::default());
        let job = h.zip_job(
            "photos.zip",
            &[("a.png", b"text of a"), ("notes.txt", b"skip me"), ("b.png", b"text of b")],
        );
        let ws_path = job.workspace.path().to_path_buf();

        let outcome = h.processor.run(job).await;

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                pages: 2,
                failed_pages: 0
            }
        );
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].contains("<b>a.png</b> (1/2)") && sent[0].contains("text of a"));
        assert!(sent[1].contains("<b>b.png</b> (2/2)") && sent[1].contains("text of b"));
        assert_eq!(h.ocr.calls(), vec!["a.png", "b.png"]);

        let docs = h.messenger.documents.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "photos.txt");
        let summary = String::from_utf8(docs[0].bytes.clone()).unwrap();
        assert!(summary.find("text of a").unwrap() < summary.find("text of b").unwrap());

        assert!(!ws_path.exists());
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn cbz_and_cz_are_processed_as_zip() {
        for name in ["chapter.cbz", "scan.cz"] {
            let h = Harness::new(FakeMessenger::default());
            let job = h.zip_job(name, &[("p1.jpg", b"one"), ("p2.jpg", b"two"), ("p3.jpg", b"three")]);
            h.processor.run(job).await;
            assert_eq!(h.messenger.sent().len(), 3, "{name}");
            assert_eq!(h.workspaces_left(), 0);
        }
    }

    #[tokio::test]
    async fn single_page_failure_does_not_abort_the_job() {
        let h = Harness::new(FakeMessenger::default());
        let job = h.zip_job(
            "photos.zip",
            &[("a.png", b"ok a"), ("b.png", b"FAIL"), ("c.png", b"ok c")],
        );

        let outcome = h.processor.run(job).await;

        assert_eq!(
            outcome,
            JobOutcome::Completed {
                pages: 3,
                failed_pages: 1
            }
        );
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent[1].contains("OCR failed: ocr error: engine crashed"));
        assert!(sent[2].contains("ok c"));
    }

    #[tokio::test]
    async fn corrupt_archive_sends_one_error_and_runs_no_ocr() {
        let h = Harness::new(FakeMessenger::default());
        let ws = Workspace::create(&h.work_root()).unwrap();
        let path = ws.upload_path("broken.zip");
        std::fs::write(&path, b"PK\x03\x04 garbage").unwrap();
        let job = h.job("broken.zip", ws, JobInput::Archive {
            path,
            kind: ArchiveKind::Zip,
        });

        let outcome = h.processor.run(job).await;

        assert!(matches!(outcome, JobOutcome::ExtractionFailed(_)));
        let sent = h.messenger.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("❌ Error extracting archive"));
        assert!(h.ocr.calls().is_empty());
        assert!(h.messenger.documents.lock().unwrap().is_empty());
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn corrupt_archive_error_replaces_status_message() {
        let h = Harness::new(FakeMessenger::default());
        let ws = Workspace::create(&h.work_root()).unwrap();
        let path = ws.upload_path("broken.7z");
        std::fs::write(&path, b"not 7z").unwrap();
        let mut job = h.job("broken.7z", ws, JobInput::Archive {
            path,
            kind: ArchiveKind::SevenZip,
        });
        let status = MessageRef {
            chat_id: ChatId(10),
            message_id: MessageId(99),
        };
        job.status = Some(status);

        h.processor.run(job).await;

        assert!(h.messenger.sent().is_empty());
        let edits = h.messenger.edited();
        let last = edits.last().unwrap();
        assert_eq!(last.0, status);
        assert!(last.1.starts_with("❌ Error extracting archive"));
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn archive_without_images_is_reported() {
        let h = Harness::new(FakeMessenger::default());
        let job = h.zip_job("docs.zip", &[("readme.txt", b"hi")]);

        assert_eq!(h.processor.run(job).await, JobOutcome::NoImages);
        assert_eq!(
            h.messenger.sent(),
            vec!["⚠️ No images found inside the archive.".to_string()]
        );
        assert!(h.ocr.calls().is_empty());
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn delivery_failure_abandons_delivery_and_still_cleans_up() {
        let h = Harness::new(FakeMessenger::failing_after(1));
        let job = h.zip_job(
            "photos.zip",
            &[("a.png", b"a"), ("b.png", b"b"), ("c.png", b"c")],
        );

        let outcome = h.processor.run(job).await;

        assert!(matches!(outcome, JobOutcome::DeliveryFailed(_)));
        assert_eq!(h.messenger.sent().len(), 1);
        assert!(h.messenger.documents.lock().unwrap().is_empty());
        assert_eq!(h.workspaces_left(), 0);

        let audit = std::fs::read_to_string(h.root.path().join("audit.log")).unwrap();
        assert!(audit.contains("\"outcome\":\"delivery_failed\""));
        assert!(audit.contains("\"username\":\"tester\""));
    }

    #[tokio::test]
    async fn cancelled_job_skips_ocr_and_cleans_up() {
        let h = Harness::new(FakeMessenger::default());
        let job = h.zip_job("photos.zip", &[("a.png", b"a")]);
        job.cancel.cancel();

        assert_eq!(h.processor.run(job).await, JobOutcome::Cancelled);
        assert!(h.ocr.calls().is_empty());
        assert_eq!(h.messenger.sent(), vec!["🛑 OCR cancelled.".to_string()]);
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn single_image_job_has_no_summary_unless_truncated() {
        let h = Harness::with_options(
            FakeMessenger::default(),
            ProcessorOptions {
                extract_limits: ExtractLimits::default(),
                message_limit: 300,
                send_summary_document: true,
            },
        );

        let ws = Workspace::create(&h.work_root()).unwrap();
        let short = ws.upload_path("short.png");
        std::fs::write(&short, b"hello").unwrap();
        let job = h.job("short.png", ws, JobInput::Image { path: short });
        h.processor.run(job).await;
        assert_eq!(h.messenger.sent().len(), 1);
        assert!(h.messenger.documents.lock().unwrap().is_empty());

        let ws = Workspace::create(&h.work_root()).unwrap();
        let long = ws.upload_path("long.png");
        std::fs::write(&long, "word ".repeat(500)).unwrap();
        let job = h.job("long.png", ws, JobInput::Image { path: long });
        h.processor.run(job).await;
        assert_eq!(h.messenger.sent().len(), 2);
        let docs = h.messenger.documents.lock().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].file_name, "long.txt");
        assert_eq!(h.workspaces_left(), 0);
    }

    #[tokio::test]
    async fn online_mode_without_engine_is_reported() {
        let h = Harness::new(FakeMessenger::default());
        let mut job = h.zip_job("photos.zip", &[("a.png", b"a")]);
        job.mode = OcrMode::Online;

        let outcome = h.processor.run(job).await;
        assert!(matches!(outcome, JobOutcome::EngineUnavailable(_)));
        assert_eq!(h.messenger.sent().len(), 1);
        assert!(h.ocr.calls().is_empty());
        assert_eq!(h.workspaces_left(), 0);
    }
}

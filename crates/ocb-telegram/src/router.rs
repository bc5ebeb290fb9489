use std::sync::Arc;

use teloxide::{dispatching::Dispatcher, dptree, prelude::*};
use tracing::{info, warn};

use ocb_core::messaging::throttled::{ThrottleConfig, ThrottledMessenger};
use ocb_core::{
    audit::AuditLogger,
    config::Config,
    intake::Intake,
    messaging::port::MessagingPort,
    ocr::OcrEngines,
    processor::{JobProcessor, ProcessorOptions},
    queue::{JobQueue, QueueConfig},
    settings::ChatSettings,
    workspace,
};

use crate::handlers;
use crate::TelegramMessenger;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub messenger: Arc<dyn MessagingPort>,
    pub queue: JobQueue,
    pub settings: Arc<ChatSettings>,
    pub engines: OcrEngines,
    pub intake: Arc<Intake>,
    pub audit: Arc<AuditLogger>,
}

pub async fn run_polling(cfg: Arc<Config>, engines: OcrEngines) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());

    if let Ok(me) = bot.get_me().await {
        info!("ocb started: @{}", me.username());
    }
    info!(
        work_dir = %cfg.work_dir.display(),
        allowed_users = cfg.telegram_allowed_users.len(),
        default_mode = %cfg.default_ocr_mode,
        online_ocr = engines.supports(ocb_core::ocr::OcrMode::Online),
        "configuration loaded"
    );

    match workspace::sweep_stale(&cfg.work_dir) {
        Ok(0) => {}
        Ok(n) => info!("removed {n} stale workspace(s)"),
        Err(e) => warn!("stale workspace sweep failed: {e}"),
    }

    // Page delivery is bursty; throttle here and keep the RetryAfter retry in the adapter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));

    let audit = Arc::new(AuditLogger::new(
        cfg.audit_log_path.clone(),
        cfg.audit_log_json,
    ));
    let settings = Arc::new(ChatSettings::new(cfg.default_ocr_mode));

    let processor = Arc::new(JobProcessor::new(
        messenger.clone(),
        engines.clone(),
        Some(audit.clone()),
        ProcessorOptions {
            extract_limits: cfg.extract_limits,
            message_limit: cfg.telegram_safe_limit,
            send_summary_document: cfg.send_summary_document,
        },
    ));
    let (queue, dispatcher) = JobQueue::start(
        QueueConfig {
            capacity: cfg.job_queue_capacity,
            workers: cfg.job_workers,
        },
        processor,
    );

    let intake = Arc::new(Intake::new(
        messenger.clone(),
        queue.clone(),
        settings.clone(),
        Some(audit.clone()),
    ));

    let state = Arc::new(AppState {
        cfg,
        messenger,
        queue,
        settings,
        engines,
        intake,
        audit,
    });

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handlers::handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    // Queue handles were dropped with the dispatcher; queued and running jobs finish first.
    if let Err(e) = dispatcher.await {
        warn!("job dispatcher ended abnormally: {e}");
    }
    info!("ocb stopped");
    Ok(())
}

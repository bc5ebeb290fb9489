use std::sync::Arc;

use teloxide::prelude::*;

use ocb_core::{
    archive::SUPPORTED_EXTENSIONS,
    domain::ChatId,
    formatting::escape_html,
    ocr::OcrMode,
    queue::{ActiveJob, JobState, QueueConfig},
};

use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

fn help_text(mode: OcrMode, online_available: bool) -> String {
    let online = if online_available {
        "available"
    } else {
        "not configured"
    };
    format!(
        "🤖 <b>Archive OCR Bot</b>\n\n\
Send an archive ({}) full of images, or a single image. \
Every page comes back as its own message, in archive order.\n\n\
Current OCR mode: <b>{}</b> ({})\n\
Online OCR: {online}\n\n\
<b>📋 Commands:</b>\n\
/start - Show this help message\n\
/ocrmode [local|online] - Show or switch OCR engine\n\
/status - Show your queued and running jobs\n\
/cancel - Cancel your queued and running jobs",
        SUPPORTED_EXTENSIONS.join(", "),
        mode.as_str().to_uppercase(),
        mode.engine_label(),
    )
}

fn status_text(jobs: &[ActiveJob], pending: usize, queue: QueueConfig, mode: OcrMode) -> String {
    let mut out = format!(
        "📊 <b>Status</b>\n\nOCR mode: <b>{}</b>\nQueue: {pending}/{} waiting, {} worker(s)\n",
        mode.as_str().to_uppercase(),
        queue.capacity,
        queue.workers
    );
    if jobs.is_empty() {
        out.push_str("\nNo active jobs.");
        return out;
    }
    out.push('\n');
    for job in jobs {
        let state = match job.state {
            JobState::Queued => "⏳ queued",
            JobState::Running => "⚙️ running",
        };
        out.push_str(&format!(
            "{} <b>{}</b>: {state}\n",
            job.id,
            escape_html(&job.file_name)
        ));
    }
    out.trim_end().to_string()
}

pub async fn handle_command(msg: &Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let chat_id = ChatId(msg.chat.id.0);
    let (cmd, arg) = parse_command(text);

    let reply = match cmd.as_str() {
        "start" | "help" => {
            let mode = state.settings.ocr_mode(chat_id).await;
            help_text(mode, state.engines.supports(OcrMode::Online))
        }

        "ocrmode" => {
            let current = state.settings.ocr_mode(chat_id).await;
            if arg.is_empty() {
                format!(
                    "Current OCR mode: <b>{}</b> ({}).\nUse <code>/ocrmode local</code> or <code>/ocrmode online</code>.",
                    current.as_str().to_uppercase(),
                    current.engine_label()
                )
            } else {
                match arg.parse::<OcrMode>() {
                    Ok(mode) if !state.engines.supports(mode) => {
                        "⚠️ Online OCR is not configured on this bot.".to_string()
                    }
                    Ok(mode) => {
                        state.settings.set_ocr_mode(chat_id, mode).await;
                        format!(
                            "✅ OCR mode set to <b>{}</b> ({}).",
                            mode.as_str().to_uppercase(),
                            mode.engine_label()
                        )
                    }
                    Err(_) => "Usage: <code>/ocrmode local</code> or <code>/ocrmode online</code>"
                        .to_string(),
                }
            }
        }

        "cancel" => match state.queue.cancel_chat(chat_id) {
            0 => "No active jobs to cancel.".to_string(),
            n => format!("🛑 Cancelling {n} job(s)..."),
        },

        "status" => {
            let mode = state.settings.ocr_mode(chat_id).await;
            status_text(
                &state.queue.active_for_chat(chat_id),
                state.queue.pending(),
                state.queue.config(),
                mode,
            )
        }

        _ => format!(
            "Unknown command: <code>/{}</code>. Try /help.",
            escape_html(&cmd)
        ),
    };

    let _ = state.messenger.send_html(chat_id, &reply).await;
    Ok(())
}

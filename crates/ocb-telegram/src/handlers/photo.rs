use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use ocb_core::{
    errors::Error,
    intake::Submission,
    job::JobInput,
    workspace::Workspace,
};

use crate::router::AppState;

use super::{download_to, sender_of};

/// A compressed photo becomes a single-image job.
pub async fn handle_photo(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(sender) = sender_of(&msg) else {
        return Ok(());
    };
    // Largest size is last.
    let Some(best) = msg.photo().and_then(|p| p.last()) else {
        return Ok(());
    };

    let file_name = format!("photo_{}.jpg", msg.id.0);
    let size = best.file.size as u64;
    if size > state.cfg.max_upload_bytes {
        let err = Error::UploadTooLarge {
            size,
            max: state.cfg.max_upload_bytes,
        };
        state.intake.reject(&sender, Some(&file_name), &err).await;
        return Ok(());
    }

    let workspace = match Workspace::create(&state.cfg.work_dir) {
        Ok(ws) => ws,
        Err(e) => {
            warn!(chat_id = sender.chat_id.0, "failed to create workspace: {e}");
            let _ = state
                .messenger
                .send_html(sender.chat_id, "❌ Could not prepare a workspace. Please try again.")
                .await;
            return Ok(());
        }
    };

    let path = workspace.upload_path(&file_name);
    if let Err(e) = download_to(&bot, &best.file.id, &path).await {
        warn!(chat_id = sender.chat_id.0, "photo download failed: {e}");
        let _ = state
            .messenger
            .send_html(sender.chat_id, "❌ Failed to download photo.")
            .await;
        return Ok(());
    }

    let _ = state
        .intake
        .submit(Submission {
            sender,
            file_name,
            input: JobInput::Image { path },
            workspace,
        })
        .await;
    Ok(())
}

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::warn;

use ocb_core::{
    formatting::escape_html,
    intake::{classify_upload, Submission, UploadKind},
    job::JobInput,
    workspace::Workspace,
};

use crate::router::AppState;

use super::{download_to, sender_of};

pub async fn handle_document(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(sender) = sender_of(&msg) else {
        return Ok(());
    };
    let Some(doc) = msg.document() else {
        return Ok(());
    };

    let file_name = doc
        .file_name
        .clone()
        .unwrap_or_else(|| "document".to_string());
    let size = doc.file.size as u64;

    let kind = match classify_upload(&file_name, size, state.cfg.max_upload_bytes) {
        Ok(kind) => kind,
        Err(e) => {
            state.intake.reject(&sender, Some(&file_name), &e).await;
            return Ok(());
        }
    };

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
    if let Err(e) = download_to(&bot, &doc.file.id, &path).await {
        warn!(chat_id = sender.chat_id.0, file = %file_name, "download failed: {e}");
        let _ = state
            .messenger
            .send_html(
                sender.chat_id,
                &format!(
                    "❌ Failed to download <b>{}</b>: {}",
                    escape_html(&file_name),
                    escape_html(&e.to_string().chars().take(100).collect::<String>())
                ),
            )
            .await;
        return Ok(());
    }

    let input = match kind {
        UploadKind::Archive(kind) => JobInput::Archive { path, kind },
        UploadKind::Image => JobInput::Image { path },
    };

    // Errors were already reported to the user by the intake.
    let _ = state
        .intake
        .submit(Submission {
            sender,
            file_name,
            input,
            workspace,
        })
        .await;
    Ok(())
}

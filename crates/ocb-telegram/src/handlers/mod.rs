//! Telegram update handlers.
//!
//! Each handler is a small adapter that:
//! - checks the sender against the allow list
//! - validates and downloads uploads
//! - hands accepted uploads to the core intake, or answers commands

use std::{path::Path, sync::Arc};

use teloxide::{net::Download, prelude::*, types::Message};
use tracing::warn;

use ocb_core::{
    audit::AuditEvent,
    domain::{ChatId, UserId},
    intake::Sender,
};

use crate::router::AppState;

mod commands;
mod document;
mod photo;

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| u.id.0 as i64);

    if !state.cfg.is_user_allowed(user_id) {
        if let Err(e) = state.audit.write(AuditEvent::rejected(
            chat_id,
            user_id.map(UserId),
            None,
            "unauthorized",
        )) {
            warn!("[AUDIT] failed to write rejected event: {e}");
        }
        let _ = state
            .messenger
            .send_html(chat_id, "Unauthorized. Contact the bot owner for access.")
            .await;
        return Ok(());
    }

    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return commands::handle_command(&msg, state).await;
        }
    }

    if msg.document().is_some() {
        return document::handle_document(bot, msg, state).await;
    }

    if msg.photo().is_some() {
        return photo::handle_photo(bot, msg, state).await;
    }

    let _ = state
        .messenger
        .send_html(
            chat_id,
            "📎 Send me a <b>.zip</b>, <b>.cbz</b>, <b>.cz</b> or <b>.7z</b> archive of images, or a single image. See /help.",
        )
        .await;
    Ok(())
}

fn sender_of(msg: &Message) -> Option<Sender> {
    let user = msg.from()?;
    Some(Sender {
        chat_id: ChatId(msg.chat.id.0),
        user_id: UserId(user.id.0 as i64),
        username: user
            .username
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    })
}

/// Download a Telegram file into `dest`.
async fn download_to(bot: &Bot, file_id: &str, dest: &Path) -> anyhow::Result<()> {
    let file = bot.get_file(file_id.to_string()).await?;
    let mut dst = tokio::fs::File::create(dest).await?;
    bot.download_file(&file.path, &mut dst).await?;
    Ok(())
}

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::{domain::ChatId, ocr::OcrMode};

/// Per-chat preferences. In-memory only; reset on restart.
#[derive(Debug)]
pub struct ChatSettings {
    default_mode: OcrMode,
    modes: Mutex<HashMap<ChatId, OcrMode>>,
}

impl ChatSettings {
    pub fn new(default_mode: OcrMode) -> Self {
        Self {
            default_mode,
            modes: Mutex::new(HashMap::new()),
        }
    }

    pub async fn ocr_mode(&self, chat_id: ChatId) -> OcrMode {
        self.modes
            .lock()
            .await
            .get(&chat_id)
            .copied()
            .unwrap_or(self.default_mode)
    }

    pub async fn set_ocr_mode(&self, chat_id: ChatId, mode: OcrMode) {
        let mut modes = self.modes.lock().await;
        if mode == self.default_mode {
            modes.remove(&chat_id);
        } else {
            modes.insert(chat_id, mode);
        }
    }
}

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities, OutgoingDocument},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between any two Telegram API calls.
    pub global_min_interval: Duration,
    /// Minimum spacing between messages (send, edit, document) in one chat.
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

/// Next free slot, globally and per chat.
#[derive(Debug)]
struct Slots {
    global: Instant,
    chats: HashMap<ChatId, Instant>,
}

impl Slots {
    /// Reserve the earliest slot allowed for a call and return how long to wait for it.
    ///
    /// `chat` is `None` for calls that only count against the global limit.
    fn reserve(&mut self, cfg: &ThrottleConfig, chat: Option<ChatId>) -> Duration {
        let now = Instant::now();
        // Chats whose next slot has passed carry no constraint.
        self.chats.retain(|_, next| *next > now);
        let mut start = self.global.max(now);
        if let Some(chat) = chat {
            if let Some(next) = self.chats.get(&chat) {
                start = start.max(*next);
            }
            self.chats.insert(chat, start + cfg.per_chat_min_interval);
        }
        self.global = start + cfg.global_min_interval;
        start.saturating_duration_since(now)
    }
}

/// MessagingPort decorator that spaces out outbound calls.
///
/// A large archive turns into a burst of page messages for one chat; spacing
/// them keeps delivery under Telegram's per-chat limit. Chat actions only
/// count against the global limit.
pub struct ThrottledMessenger {
    inner: Arc<dyn MessagingPort>,
    cfg: ThrottleConfig,
    slots: Mutex<Slots>,
}

impl ThrottledMessenger {
    pub fn new(inner: Arc<dyn MessagingPort>, cfg: ThrottleConfig) -> Self {
        let now = Instant::now();
        Self {
            inner,
            cfg,
            slots: Mutex::new(Slots {
                global: now,
                chats: HashMap::new(),
            }),
        }
    }

    async fn wait_turn(&self, chat: Option<ChatId>) {
        let wait = self.slots.lock().await.reserve(&self.cfg, chat);
        if !wait.is_zero() {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl MessagingPort for ThrottledMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        self.inner.capabilities()
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner.send_html(chat_id, html).await
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.wait_turn(Some(msg.chat_id)).await;
        self.inner.edit_html(msg, html).await
    }

    async fn send_chat_action(&self, chat_id: ChatId, action: ChatAction) -> Result<()> {
        self.wait_turn(None).await;
        self.inner.send_chat_action(chat_id, action).await
    }

    async fn send_document(&self, chat_id: ChatId, doc: OutgoingDocument) -> Result<MessageRef> {
        self.wait_turn(Some(chat_id)).await;
        self.inner.send_document(chat_id, doc).await
    }
}

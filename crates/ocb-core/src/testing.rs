//! In-memory fakes shared by unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef},
    errors::Error,
    messaging::{
        port::MessagingPort,
        types::{ChatAction, MessagingCapabilities, OutgoingDocument},
    },
    Result,
};

/// Records everything sent; `send_html` can be made to fail after `n` sends.
#[derive(Default)]
pub(crate) struct FakeMessenger {
    next_id: AtomicUsize,
    pub sends: Mutex<Vec<(ChatId, String)>>,
    pub edits: Mutex<Vec<(MessageRef, String)>>,
    pub documents: Mutex<Vec<OutgoingDocument>>,
    fail_sends_after: Option<usize>,
}

impl FakeMessenger {
    pub fn failing_after(n: usize) -> Self {
        Self {
            fail_sends_after: Some(n),
            ..Default::default()
        }
    }

    /// HTML of every sent message, in order.
    pub fn sent(&self) -> Vec<String> {
        self.sends
            .lock()
            .unwrap()
            .iter()
            .map(|(_, html)| html.clone())
            .collect()
    }

    pub fn edited(&self) -> Vec<(MessageRef, String)> {
        self.edits.lock().unwrap().clone()
    }

    fn alloc(&self, chat_id: ChatId) -> MessageRef {
        MessageRef {
            chat_id,
            message_id: MessageId(self.next_id.fetch_add(1, Ordering::SeqCst) as i32 + 1),
        }
    }
}

#[async_trait]
impl MessagingPort for FakeMessenger {
    fn capabilities(&self) -> MessagingCapabilities {
        MessagingCapabilities {
            supports_edit: true,
            supports_documents: true,
            max_message_len: 4096,
        }
    }

    async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
        let mut sends = self.sends.lock().unwrap();
        if self.fail_sends_after.is_some_and(|n| sends.len() >= n) {
            return Err(Error::External(
                "telegram error: Forbidden: bot was blocked by the user".to_string(),
            ));
        }
        sends.push((chat_id, html.to_string()));
        Ok(self.alloc(chat_id))
    }

    async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
        self.edits.lock().unwrap().push((msg, html.to_string()));
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: ChatId, _action: ChatAction) -> Result<()> {
        Ok(())
    }

    async fn send_document(&self, chat_id: ChatId, doc: OutgoingDocument) -> Result<MessageRef> {
        self.documents.lock().unwrap().push(doc);
        Ok(self.alloc(chat_id))
    }
}

/// Outgoing "chat action" (typing indicator, etc).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
}

/// Capabilities / feature flags of a messenger implementation.
#[derive(Clone, Copy, Debug)]
pub struct MessagingCapabilities {
    pub supports_edit: bool,
    pub supports_documents: bool,
    pub max_message_len: usize,
}

/// A file sent as a document attachment.
#[derive(Clone, Debug)]
pub struct OutgoingDocument {
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// HTML caption.
    pub caption: Option<String>,
}

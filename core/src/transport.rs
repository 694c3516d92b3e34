//! Transport-neutral chat model.
//!
//! The conversation layer only sees [`IncomingMessage`] values and talks
//! back through [`ChatPort`]; the Telegram client in `checkgate-cli` is one
//! implementation.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::identifier::UserKey;

/// Opaque chat address understood by the transport.
pub type ChatId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Admin,
}

impl Command {
    /// Parse `/start` or `/admin`, optionally addressed as `/admin@botname`.
    /// Anything else is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split_once('@').map_or(name, |(name, _)| name);
        match name {
            "start" => Some(Command::Start),
            "admin" => Some(Command::Admin),
            _ => None,
        }
    }
}

/// Reference to a file the transport can download on request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Command(Command),
    Text(String),
    Document {
        file: FileRef,
        file_name: Option<String>,
        mime_type: Option<String>,
    },
    Photo {
        file: FileRef,
    },
    /// Stickers, voice notes and everything else the bot does not handle.
    Other,
}

impl MessageBody {
    /// Classify a plain text message, recognising the two commands.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        match Command::parse(&text) {
            Some(command) => MessageBody::Command(command),
            None => MessageBody::Text(text),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MessageBody::Command(Command::Start) => "start",
            MessageBody::Command(Command::Admin) => "admin",
            MessageBody::Text(_) => "text",
            MessageBody::Document { .. } => "document",
            MessageBody::Photo { .. } => "photo",
            MessageBody::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub user: UserKey,
    pub chat: ChatId,
    /// Transport message id, used to thread replies.
    pub message_id: Option<i64>,
    pub body: MessageBody,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Request(String),
    #[error("transport rejected the request: {0}")]
    Rejected(String),
}

/// Outbound side of the chat transport.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<i64>,
        text: &str,
    ) -> Result<(), TransportError>;

    async fn send_document(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<(), TransportError>;

    async fn fetch_file(&self, file: &FileRef) -> Result<Bytes, TransportError>;
}

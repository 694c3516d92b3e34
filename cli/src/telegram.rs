//! Minimal Telegram Bot API client: long polling, text replies, document
//! uploads and file downloads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use checkgate_core::UserKey;
use checkgate_core::transport::ChatId;
use checkgate_core::transport::ChatPort;
use checkgate_core::transport::FileRef;
use checkgate_core::transport::IncomingMessage;
use checkgate_core::transport::MessageBody;
use checkgate_core::transport::TransportError;
use reqwest::multipart;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

/// Slack on top of the long-poll timeout before the HTTP request itself
/// gives up.
const REQUEST_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("request to {method} failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} rejected ({code}): {description}")]
    Api {
        method: &'static str,
        code: i64,
        description: String,
    },
    #[error("{method} returned no result")]
    EmptyResult { method: &'static str },
    #[error("file {0} has no download path")]
    MissingFilePath(String),
}

impl From<TelegramError> for TransportError {
    fn from(err: TelegramError) -> Self {
        match err {
            TelegramError::Api { .. } | TelegramError::MissingFilePath(_) => {
                TransportError::Rejected(err.to_string())
            }
            TelegramError::Http { .. } | TelegramError::EmptyResult { .. } => {
                TransportError::Request(err.to_string())
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct File {
    file_id: String,
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct GetUpdates {
    offset: i64,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

/// Stable key for a Telegram user: the username when set, `id:<n>`
/// otherwise.
pub fn user_key(user: &User) -> UserKey {
    match user.username.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => UserKey::from(name),
        None => UserKey::new(format!("id:{}", user.id)),
    }
}

/// Translate a Bot API message into the transport-neutral model. Messages
/// without a sender (channel posts) are skipped.
pub fn incoming(message: &Message) -> Option<IncomingMessage> {
    let user = user_key(message.from.as_ref()?);
    let body = if let Some(document) = &message.document {
        MessageBody::Document {
            file: FileRef(document.file_id.clone()),
            file_name: document.file_name.clone(),
            mime_type: document.mime_type.clone(),
        }
    } else if let Some(largest) = message.photo.as_ref().and_then(|sizes| {
        sizes
            .iter()
            .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
    }) {
        MessageBody::Photo {
            file: FileRef(largest.file_id.clone()),
        }
    } else if let Some(text) = &message.text {
        MessageBody::from_text(text.as_str())
    } else {
        MessageBody::Other
    };
    Some(IncomingMessage {
        user,
        chat: message.chat.id,
        message_id: Some(message.message_id),
        body,
    })
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        poll_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(poll_timeout + REQUEST_GRACE)
            .build()?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{}/file/bot{}/{file_path}", self.api_base, self.token)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, TelegramError> {
        let response = request
            .send()
            .await
            .map_err(|source| TelegramError::Http { method, source })?;
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|source| TelegramError::Http { method, source })?;
        if !body.ok {
            return Err(TelegramError::Api {
                method,
                code: body.error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: body.description.unwrap_or_default(),
            });
        }
        body.result.ok_or(TelegramError::EmptyResult { method })
    }

    pub async fn get_updates(
        &self,
        offset: i64,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let request = self.http.post(self.method_url("getUpdates")).json(&GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ["message"],
        });
        self.call("getUpdates", request).await
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        reply_to: Option<i64>,
        text: &str,
    ) -> Result<(), TelegramError> {
        let mut payload = json!({ "chat_id": chat, "text": text });
        if let Some(message_id) = reply_to {
            payload["reply_parameters"] = json!({
                "message_id": message_id,
                "allow_sending_without_reply": true,
            });
        }
        let request = self.http.post(self.method_url("sendMessage")).json(&payload);
        self.call::<serde_json::Value>("sendMessage", request)
            .await
            .map(drop)
    }

    pub async fn upload_document(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<(), TelegramError> {
        let part = multipart::Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str("text/csv")
            .map_err(|source| TelegramError::Http {
                method: "sendDocument",
                source,
            })?;
        let form = multipart::Form::new()
            .text("chat_id", chat.to_string())
            .part("document", part);
        let request = self.http.post(self.method_url("sendDocument")).multipart(form);
        self.call::<serde_json::Value>("sendDocument", request)
            .await
            .map(drop)
    }

    pub async fn download(&self, file_id: &str) -> Result<Bytes, TelegramError> {
        let request = self
            .http
            .post(self.method_url("getFile"))
            .json(&json!({ "file_id": file_id }));
        let file: File = self.call("getFile", request).await?;
        let file_path = file
            .file_path
            .ok_or_else(|| TelegramError::MissingFilePath(file.file_id.clone()))?;

        let method = "downloadFile";
        self.http
            .get(self.file_url(&file_path))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| TelegramError::Http { method, source })?
            .bytes()
            .await
            .map_err(|source| TelegramError::Http { method, source })
    }
}

#[async_trait]
impl ChatPort for TelegramClient {
    async fn send_text(
        &self,
        chat: ChatId,
        reply_to: Option<i64>,
        text: &str,
    ) -> Result<(), TransportError> {
        Ok(self.send_message(chat, reply_to, text).await?)
    }

    async fn send_document(
        &self,
        chat: ChatId,
        file_name: &str,
        bytes: Bytes,
    ) -> Result<(), TransportError> {
        Ok(self.upload_document(chat, file_name, bytes).await?)
    }

    async fn fetch_file(&self, file: &FileRef) -> Result<Bytes, TransportError> {
        Ok(self.download(&file.0).await?)
    }
}

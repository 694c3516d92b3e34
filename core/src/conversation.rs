//! The conversation state machine.
//!
//! ```text
//! any              --/start-->            AwaitingReceipt  (greeting)
//! any              --/admin, admin-->     Idle             (report)
//! any              --/admin, not admin--> AwaitingPassword (prompt)
//! AwaitingReceipt  --accepted/duplicate-> Idle
//! AwaitingReceipt  --anything else-->     AwaitingReceipt  (reply)
//! AwaitingPassword --text-->              Idle             (report or "wrong password")
//! ```
//!
//! Messages with no transition from the current state are dropped.
//! Storage failures leave the state untouched.

use std::sync::Arc;

use bytes::Bytes;

use crate::extract::ExtractionError;
use crate::extract::PDF_MIME_TYPE;
use crate::extract::ReceiptContent;
use crate::extract::ReceiptDocument;
use crate::gate::AdminElevationGate;
use crate::gate::Elevation;
use crate::identifier::UserKey;
use crate::intake::IntakeError;
use crate::intake::IntakeOutcome;
use crate::intake::ReceiptIntake;
use crate::replies::Replies;
use crate::report::REPORT_FILE_NAME;
use crate::report::render_whitelist_csv;
use crate::session::ConversationState;
use crate::session::SessionLane;
use crate::session::SessionTable;
use crate::store::StoreError;
use crate::transport::ChatPort;
use crate::transport::Command;
use crate::transport::FileRef;
use crate::transport::IncomingMessage;
use crate::transport::MessageBody;
use crate::transport::TransportError;

#[derive(Clone)]
pub struct Conversation {
    sessions: SessionTable,
    intake: ReceiptIntake,
    gate: AdminElevationGate,
    port: Arc<dyn ChatPort>,
    replies: Arc<Replies>,
}

impl Conversation {
    pub fn new(
        intake: ReceiptIntake,
        gate: AdminElevationGate,
        port: Arc<dyn ChatPort>,
        replies: Replies,
    ) -> Self {
        Self {
            sessions: SessionTable::new(),
            intake,
            gate,
            port,
            replies: Arc::new(replies),
        }
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Process one message to completion and return the sender's new state.
    ///
    /// Waits behind any message of the same user that is still in flight.
    pub async fn handle(
        &self,
        message: IncomingMessage,
    ) -> Result<ConversationState, TransportError> {
        let mut lane = self.sessions.lane(&message.user).await;
        let state = lane.state();
        tracing::debug!(
            user = %message.user,
            state = state.as_str(),
            kind = message.body.label(),
            "incoming message"
        );

        match (&message.body, state) {
            (MessageBody::Command(Command::Start), _) => {
                lane.transition(ConversationState::AwaitingReceipt);
                self.reply(&message, &self.replies.greeting).await?;
            }
            (MessageBody::Command(Command::Admin), _) => {
                self.admin_command(&message, &mut lane).await?;
            }
            (MessageBody::Text(candidate), ConversationState::AwaitingPassword) => {
                self.password(&message, candidate, &mut lane).await?;
            }
            (
                MessageBody::Document {
                    file,
                    file_name,
                    mime_type,
                },
                ConversationState::AwaitingReceipt,
            ) => {
                let is_pdf = mime_type
                    .as_deref()
                    .is_some_and(|mime| mime.eq_ignore_ascii_case(PDF_MIME_TYPE));
                if !is_pdf {
                    self.reply(&message, &self.replies.reprompt).await?;
                } else if let Some(bytes) = self.download(&message, file).await? {
                    let content = ReceiptContent::Document(ReceiptDocument {
                        file_name: file_name.clone(),
                        mime_type: mime_type.clone(),
                        bytes,
                    });
                    self.submit(&message, &content, &mut lane).await?;
                }
            }
            (MessageBody::Photo { file }, ConversationState::AwaitingReceipt) => {
                if let Some(bytes) = self.download(&message, file).await? {
                    self.submit(&message, &ReceiptContent::Photo(bytes), &mut lane)
                        .await?;
                }
            }
            (MessageBody::Text(_) | MessageBody::Other, ConversationState::AwaitingReceipt) => {
                self.reply(&message, &self.replies.reprompt).await?;
            }
            (body, state) => {
                tracing::debug!(
                    user = %message.user,
                    state = state.as_str(),
                    kind = body.label(),
                    "no transition; message ignored"
                );
            }
        }
        Ok(lane.state())
    }

    async fn admin_command(
        &self,
        message: &IncomingMessage,
        lane: &mut SessionLane,
    ) -> Result<(), TransportError> {
        match self.gate.is_admin(&message.user) {
            Ok(true) => {
                lane.transition(ConversationState::Idle);
                self.send_report(message).await
            }
            Ok(false) => {
                lane.transition(ConversationState::AwaitingPassword);
                self.reply(message, &self.replies.password_prompt).await
            }
            Err(err) => self.storage_failure(message, &err).await,
        }
    }

    async fn password(
        &self,
        message: &IncomingMessage,
        candidate: &str,
        lane: &mut SessionLane,
    ) -> Result<(), TransportError> {
        match self.gate.attempt(&message.user, candidate) {
            Ok(Elevation::Elevated) => {
                lane.transition(ConversationState::Idle);
                self.send_report(message).await
            }
            Ok(Elevation::Rejected) => {
                lane.transition(ConversationState::Idle);
                self.reply(message, &self.replies.wrong_password).await
            }
            Err(err) => self.storage_failure(message, &err).await,
        }
    }

    async fn submit(
        &self,
        message: &IncomingMessage,
        content: &ReceiptContent,
        lane: &mut SessionLane,
    ) -> Result<(), TransportError> {
        match self.intake.submit(&message.user, content).await {
            Ok(IntakeOutcome::Accepted { .. }) => {
                lane.transition(ConversationState::Idle);
                self.reply(message, &self.replies.accepted).await
            }
            Ok(IntakeOutcome::Duplicate { .. }) => {
                lane.transition(ConversationState::Idle);
                self.reply(message, &self.replies.duplicate).await
            }
            Err(IntakeError::Extraction(err)) => {
                let text = match err {
                    ExtractionError::FormatMismatch(_) => &self.replies.reprompt,
                    ExtractionError::ParseFailure(_) => &self.replies.invalid_receipt,
                    ExtractionError::CrossCheckMismatch { .. } => &self.replies.inconsistent,
                };
                self.reply(message, text).await
            }
            Err(err @ (IntakeError::Storage(_) | IntakeError::Scratch(_))) => {
                tracing::error!(user = %message.user, error = %err, "receipt intake failed");
                self.reply(message, &self.replies.storage_failure).await
            }
        }
    }

    /// `None` means the download failed and the user was already told.
    async fn download(
        &self,
        message: &IncomingMessage,
        file: &FileRef,
    ) -> Result<Option<Bytes>, TransportError> {
        match self.port.fetch_file(file).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) => {
                tracing::warn!(user = %message.user, error = %err, "failed to download attachment");
                self.reply(message, &self.replies.invalid_receipt).await?;
                Ok(None)
            }
        }
    }

    async fn send_report(&self, message: &IncomingMessage) -> Result<(), TransportError> {
        let users: Vec<UserKey> = match self.intake.stores().whitelist() {
            Ok(users) => users,
            Err(err) => return self.storage_failure(message, &err).await,
        };
        tracing::info!(user = %message.user, entries = users.len(), "sending whitelist report");
        let csv = render_whitelist_csv(&users);
        self.port
            .send_document(message.chat, REPORT_FILE_NAME, Bytes::from(csv))
            .await
    }

    async fn storage_failure(
        &self,
        message: &IncomingMessage,
        err: &StoreError,
    ) -> Result<(), TransportError> {
        tracing::error!(user = %message.user, error = %err, "store access failed");
        self.reply(message, &self.replies.storage_failure).await
    }

    async fn reply(&self, message: &IncomingMessage, text: &str) -> Result<(), TransportError> {
        self.port
            .send_text(message.chat, message.message_id, text)
            .await
    }
}

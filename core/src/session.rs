//! Per-user conversation state.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::OwnedMutexGuard;

use crate::identifier::UserKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingReceipt,
    AwaitingPassword,
}

impl ConversationState {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::AwaitingReceipt => "awaiting_receipt",
            ConversationState::AwaitingPassword => "awaiting_password",
        }
    }
}

/// Exclusive handle on one user's session, held while a message from that
/// user is processed. Messages from the same user queue behind it.
#[derive(Debug)]
pub struct SessionLane {
    user: UserKey,
    state: OwnedMutexGuard<ConversationState>,
}

impl SessionLane {
    pub fn user(&self) -> &UserKey {
        &self.user
    }

    pub fn state(&self) -> ConversationState {
        *self.state
    }

    pub fn transition(&mut self, next: ConversationState) {
        if *self.state != next {
            tracing::debug!(
                user = %self.user,
                from = self.state.as_str(),
                to = next.as_str(),
                "session transition"
            );
        }
        *self.state = next;
    }
}

/// Sessions are created `Idle` on first contact and never removed.
#[derive(Debug, Default, Clone)]
pub struct SessionTable {
    sessions: Arc<Mutex<HashMap<UserKey, Arc<AsyncMutex<ConversationState>>>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user: &UserKey) -> Arc<AsyncMutex<ConversationState>> {
        let mut sessions = match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions.entry(user.clone()).or_default().clone()
    }

    /// Wait for exclusive access to `user`'s session.
    pub async fn lane(&self, user: &UserKey) -> SessionLane {
        let state = self.slot(user).lock_owned().await;
        SessionLane {
            user: user.clone(),
            state,
        }
    }

    /// Current state without taking the lane; `Idle` for unknown users.
    pub async fn peek(&self, user: &UserKey) -> ConversationState {
        *self.slot(user).lock().await
    }
}

//! Long-poll loop feeding Telegram updates into the conversation.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use checkgate_core::Conversation;
use checkgate_core::UserKey;
use checkgate_core::transport::IncomingMessage;
use tokio::sync::mpsc;

use crate::telegram::TelegramClient;
use crate::telegram::incoming;

/// Messages buffered per user before new ones are dropped.
const WORKER_QUEUE: usize = 16;
/// A worker with no message for this long exits; the next message from the
/// same user starts a fresh one.
const WORKER_IDLE: Duration = Duration::from_secs(300);

/// Routes messages to one worker task per user so each user's messages are
/// handled in arrival order while different users proceed concurrently.
pub struct Dispatcher {
    conversation: Conversation,
    workers: HashMap<UserKey, mpsc::Sender<IncomingMessage>>,
    queue: usize,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(conversation: Conversation) -> Self {
        Self::with_limits(conversation, WORKER_QUEUE, WORKER_IDLE)
    }

    pub fn with_limits(conversation: Conversation, queue: usize, idle: Duration) -> Self {
        Self {
            conversation,
            workers: HashMap::new(),
            queue: queue.max(1),
            idle,
        }
    }

    pub fn dispatch(&mut self, message: IncomingMessage) {
        let message = match self.workers.get(&message.user) {
            Some(worker) => match worker.try_send(message) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(message)) => {
                    tracing::warn!(
                        user = %message.user,
                        queue = self.queue,
                        "user has too many pending messages; dropping one"
                    );
                    return;
                }
                Err(mpsc::error::TrySendError::Closed(message)) => message,
            },
            None => message,
        };
        let worker = self.spawn_worker(&message.user);
        if worker.try_send(message).is_err() {
            tracing::error!("user worker exited before receiving its first message");
        }
    }

    fn spawn_worker(&mut self, user: &UserKey) -> mpsc::Sender<IncomingMessage> {
        self.workers.retain(|_, worker| !worker.is_closed());
        let (tx, mut rx) = mpsc::channel::<IncomingMessage>(self.queue);
        let conversation = self.conversation.clone();
        let idle = self.idle;
        let owner = user.clone();
        tokio::spawn(async move {
            loop {
                match tokio::time::timeout(idle, rx.recv()).await {
                    Ok(Some(message)) => handle(&conversation, message).await,
                    Ok(None) => break,
                    Err(_) => {
                        // Refuse new messages, then finish the ones already queued.
                        rx.close();
                        while let Some(message) = rx.recv().await {
                            handle(&conversation, message).await;
                        }
                        tracing::debug!(user = %owner, "user worker idle; exiting");
                        break;
                    }
                }
            }
        });
        self.workers.insert(user.clone(), tx.clone());
        tx
    }

    #[cfg(test)]
    fn has_worker(&self, user: &UserKey) -> bool {
        self.workers.get(user).is_some_and(|worker| !worker.is_closed())
    }
}

async fn handle(conversation: &Conversation, message: IncomingMessage) {
    let user = message.user.clone();
    if let Err(err) = conversation.handle(message).await {
        tracing::warn!(%user, error = %err, "failed to deliver reply");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub timeout: Duration,
    pub retry_delay: Duration,
}

/// Poll until `shutdown` resolves. Update offsets advance even for updates
/// that carry nothing the bot handles.
pub async fn run(
    client: TelegramClient,
    conversation: Conversation,
    settings: PollSettings,
    shutdown: impl Future<Output = ()>,
) {
    let mut dispatcher = Dispatcher::new(conversation);
    let mut offset = 0_i64;
    tokio::pin!(shutdown);
    tracing::info!("polling for updates");

    loop {
        let updates = tokio::select! {
            () = &mut shutdown => break,
            result = client.get_updates(offset, settings.timeout) => result,
        };
        match updates {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    match update.message.as_ref().and_then(incoming) {
                        Some(message) => dispatcher.dispatch(message),
                        None => tracing::debug!(update = update.update_id, "skipping update"),
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, delay = ?settings.retry_delay, "polling failed; retrying");
                tokio::select! {
                    () = &mut shutdown => break,
                    () = tokio::time::sleep(settings.retry_delay) => {}
                }
            }
        }
    }
    tracing::info!("polling stopped");
}

//! Per-chat ordered dispatch of inbound events.
//!
//! Each active chat gets one worker that handles its events strictly in
//! arrival order; different chats run concurrently. A worker that sees no
//! event for the idle timeout retires, and the next event for its chat
//! starts a fresh one. A handler that panics loses only the event it was
//! handling; the worker logs it and moves on to the next.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use warden_core::{ChatId, InboundEvent, ModerationController};

/// Consumer of dispatched events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}

#[async_trait]
impl EventHandler for ModerationController {
    async fn handle(&self, event: InboundEvent) {
        self.dispatch(&event).await;
    }
}

struct Worker {
    sender: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

type Workers = Arc<Mutex<HashMap<ChatId, Worker>>>;

/// Routes events to one sequential worker per chat.
pub struct ChatDispatcher<H: EventHandler + 'static> {
    handler: Arc<H>,
    workers: Workers,
    idle_timeout: Duration,
}

impl<H: EventHandler + 'static> ChatDispatcher<H> {
    #[must_use]
    pub fn new(handler: Arc<H>, idle_timeout: Duration) -> Self {
        Self {
            handler,
            workers: Arc::new(Mutex::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Queue an event behind all earlier events of the same chat.
    pub fn submit(&self, event: InboundEvent) {
        let chat_id = event.chat_id();
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);

        let event = match workers.get(&chat_id) {
            Some(worker) => match worker.sender.send(event) {
                Ok(()) => return,
                // Worker died; replace it below.
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        if sender.send(event).is_err() {
            return;
        }
        let handle = tokio::spawn(run_worker(
            chat_id,
            receiver,
            self.handler.clone(),
            self.workers.clone(),
            self.idle_timeout,
        ));
        debug!(chat_id, "Chat worker started");
        workers.insert(chat_id, Worker { sender, handle });
    }

    /// Number of chats with a live worker.
    #[must_use]
    pub fn active_chats(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting work and let workers drain their queues.
    ///
    /// Workers still busy after `grace` are aborted.
    pub async fn shutdown(&self, grace: Duration) {
        let drained: Vec<Worker> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, worker)| worker)
            .collect();

        for worker in drained {
            drop(worker.sender);
            let abort = worker.handle.abort_handle();
            if tokio::time::timeout(grace, worker.handle).await.is_err() {
                warn!("Chat worker did not drain in time, aborting");
                abort.abort();
            }
        }
    }
}

async fn run_worker<H: EventHandler + 'static>(
    chat_id: ChatId,
    mut receiver: mpsc::UnboundedReceiver<InboundEvent>,
    handler: Arc<H>,
    workers: Workers,
    idle_timeout: Duration,
) {
    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(event)) => handle_isolated(chat_id, &handler, event).await,
            Ok(None) => break,
            Err(_) => {
                // Senders only push while holding the table lock, so an
                // empty queue seen under that lock stays empty.
                let mut table = workers.lock().unwrap_or_else(PoisonError::into_inner);
                if receiver.is_empty() {
                    table.remove(&chat_id);
                    debug!(chat_id, "Chat worker retired after idle timeout");
                    break;
                }
            }
        }
    }
}

/// Run one event on its own task so a panic cannot take the worker down.
async fn handle_isolated<H: EventHandler + 'static>(
    chat_id: ChatId,
    handler: &Arc<H>,
    event: InboundEvent,
) {
    let event_id = event.event_id().to_string();
    let handler = Arc::clone(handler);
    if let Err(e) = tokio::spawn(async move { handler.handle(event).await }).await {
        error!(chat_id, event_id = %event_id, error = %e, "Event handler failed, event dropped");
    }
}

//! Enforcement reconciliation.
//!
//! When a platform call fails or times out, the committed local state stays
//! authoritative and the call is handed to this queue. Workers retry with
//! exponential backoff until the platform agrees, the action is superseded
//! by a newer local mutation, or the retry budget runs out, in which case
//! the job becomes a dead letter.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use warden_common::{AppError, AppResult, DeadLetterEntry, RetryConfig};

use crate::services::collaborators::{EnforcementAction, Enforcer};
use crate::services::infraction_store::{ChatId, InfractionStore, UserId};

/// Maximum number of concurrent reconciliation workers.
const MAX_WORKERS: usize = 4;

/// Channel buffer size for pending jobs.
const JOB_BUFFER_SIZE: usize = 1000;

/// Dead letters kept in memory for inspection.
const DEAD_LETTER_CAPACITY: usize = 1000;

/// An enforcement call that still has to reach the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementJob {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub action: EnforcementAction,
}

/// Sink for failed enforcement calls.
#[async_trait]
pub trait ReconciliationQueue: Send + Sync {
    /// Queue a job without waiting for capacity.
    async fn enqueue(&self, job: EnforcementJob) -> AppResult<()>;
}

/// Issue one enforcement call with a bounded wait.
pub async fn enforce_with_timeout(
    enforcer: &dyn Enforcer,
    job: &EnforcementJob,
    timeout: Duration,
) -> AppResult<()> {
    match tokio::time::timeout(
        timeout,
        enforcer.enforce(job.chat_id, job.user_id, &job.action),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(AppError::EnforcementFailure(format!(
            "{} timed out after {}ms",
            job.action.name(),
            timeout.as_millis()
        ))),
    }
}

type DeadLetters = Arc<Mutex<Vec<DeadLetterEntry<EnforcementJob>>>>;

/// Handle for enqueueing reconciliation jobs.
#[derive(Clone)]
pub struct ReconciliationSender {
    sender: mpsc::Sender<EnforcementJob>,
}

#[async_trait]
impl ReconciliationQueue for ReconciliationSender {
    async fn enqueue(&self, job: EnforcementJob) -> AppResult<()> {
        self.sender.try_send(job).map_err(|e| {
            AppError::EnforcementFailure(format!("reconciliation queue unavailable: {e}"))
        })
    }
}

/// Services needed by reconciliation workers.
pub struct ReconciliationContext {
    pub enforcer: Arc<dyn Enforcer>,
    pub store: Arc<InfractionStore>,
    pub retry: RetryConfig,
    pub timeout: Duration,
}

/// Worker pool draining the reconciliation queue.
pub struct ReconciliationService {
    sender: mpsc::Sender<EnforcementJob>,
    receiver: mpsc::Receiver<EnforcementJob>,
    dead_letters: DeadLetters,
}

impl Default for ReconciliationService {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationService {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel(JOB_BUFFER_SIZE);
        Self {
            sender,
            receiver,
            dead_letters: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get a sender for enqueueing jobs.
    #[must_use]
    pub fn sender(&self) -> ReconciliationSender {
        ReconciliationSender {
            sender: self.sender.clone(),
        }
    }

    /// Handle for reading dead letters after the service is started.
    #[must_use]
    pub fn dead_letters(&self) -> DeadLetterView {
        DeadLetterView {
            entries: Arc::clone(&self.dead_letters),
        }
    }

    /// Start the worker pool. It stops once every sender is dropped.
    pub fn start(self, context: ReconciliationContext) -> JoinHandle<()> {
        let Self {
            sender,
            mut receiver,
            dead_letters,
        } = self;
        drop(sender);
        let context = Arc::new(context);

        tokio::spawn(async move {
            info!("Reconciliation worker starting with {} workers", MAX_WORKERS);
            let semaphore = Arc::new(Semaphore::new(MAX_WORKERS));

            while let Some(job) = receiver.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let ctx = context.clone();
                let dead_letters = dead_letters.clone();

                tokio::spawn(async move {
                    let _permit = permit;
                    reconcile(job, &ctx, &dead_letters).await;
                });
            }
            info!("Reconciliation worker stopped");
        })
    }
}

/// Read access to exhausted jobs.
#[derive(Clone)]
pub struct DeadLetterView {
    entries: DeadLetters,
}

impl DeadLetterView {
    /// Snapshot of dead letters, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeadLetterEntry<EnforcementJob>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Retry one job until it succeeds, is superseded or runs out of attempts.
async fn reconcile(job: EnforcementJob, ctx: &ReconciliationContext, dead_letters: &DeadLetters) {
    let mut attempt = 0;
    loop {
        tokio::time::sleep(ctx.retry.delay_for_attempt(attempt)).await;
        attempt += 1;

        let result = match ctx.store.get(job.chat_id, job.user_id).await {
            Ok(record) if !job.action.is_current(&record) => {
                debug!(
                    chat_id = job.chat_id,
                    user_id = job.user_id,
                    action = job.action.name(),
                    "Enforcement superseded by newer state, dropping"
                );
                return;
            }
            Ok(_) => enforce_with_timeout(ctx.enforcer.as_ref(), &job, ctx.timeout).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                info!(
                    chat_id = job.chat_id,
                    user_id = job.user_id,
                    action = job.action.name(),
                    attempt,
                    "Enforcement reconciled"
                );
                return;
            }
            Err(e) if ctx.retry.should_retry(attempt) => {
                debug!(
                    chat_id = job.chat_id,
                    user_id = job.user_id,
                    attempt,
                    error = %e,
                    "Enforcement retry failed"
                );
            }
            Err(e) => {
                warn!(
                    chat_id = job.chat_id,
                    user_id = job.user_id,
                    action = job.action.name(),
                    attempts = attempt,
                    error = %e,
                    "Enforcement reconciliation failed, local and platform state diverge"
                );
                let mut entries = dead_letters.lock().unwrap_or_else(PoisonError::into_inner);
                if entries.len() >= DEAD_LETTER_CAPACITY {
                    entries.remove(0);
                }
                entries.push(DeadLetterEntry::new(job, attempt, e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{MemoryInfractionBackend, RecordingEnforcer};

    fn fast_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    async fn banned_store() -> Arc<InfractionStore> {
        let store = Arc::new(InfractionStore::new(Arc::new(MemoryInfractionBackend::new())));
        store
            .mutate(-100, 7, |r| {
                let mut next = r.clone();
                next.ban_reason = Some("spam".to_string());
                next
            })
            .await
            .unwrap();
        store
    }

    fn ban_job() -> EnforcementJob {
        EnforcementJob {
            chat_id: -100,
            user_id: 7,
            action: EnforcementAction::Ban,
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..200 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_enforcement_failure() {
        let enforcer = RecordingEnforcer::new();
        enforcer.set_delay(Duration::from_millis(200));

        let result = enforce_with_timeout(&enforcer, &ban_job(), Duration::from_millis(10)).await;
        assert!(matches!(result, Err(AppError::EnforcementFailure(_))));
    }

    #[tokio::test]
    async fn test_failed_job_is_retried_until_success() {
        let enforcer = Arc::new(RecordingEnforcer::new());
        enforcer.fail_next(2);

        let service = ReconciliationService::new();
        let sender = service.sender();
        service.start(ReconciliationContext {
            enforcer: enforcer.clone(),
            store: banned_store().await,
            retry: fast_retry(5),
            timeout: Duration::from_millis(100),
        });

        sender.enqueue(ban_job()).await.unwrap();
        wait_until(|| enforcer.successes().len() == 1).await;

        assert_eq!(enforcer.successes(), vec![(-100, 7, EnforcementAction::Ban)]);
        assert_eq!(enforcer.calls(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_job_becomes_dead_letter() {
        let enforcer = Arc::new(RecordingEnforcer::new());
        enforcer.fail_next(u32::MAX);

        let service = ReconciliationService::new();
        let sender = service.sender();
        let dead = service.dead_letters();
        service.start(ReconciliationContext {
            enforcer: enforcer.clone(),
            store: banned_store().await,
            retry: fast_retry(2),
            timeout: Duration::from_millis(100),
        });

        sender.enqueue(ban_job()).await.unwrap();
        wait_until(|| !dead.snapshot().is_empty()).await;

        let entries = dead.snapshot();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 2);
        assert_eq!(entries[0].job, ban_job());
    }

    #[tokio::test]
    async fn test_superseded_job_is_dropped() {
        let enforcer = Arc::new(RecordingEnforcer::new());
        let store = banned_store().await;
        store.reset(-100, 7).await.unwrap();

        let service = ReconciliationService::new();
        let sender = service.sender();
        let dead = service.dead_letters();
        let handle = service.start(ReconciliationContext {
            enforcer: enforcer.clone(),
            store,
            retry: fast_retry(3),
            timeout: Duration::from_millis(100),
        });

        sender.enqueue(ban_job()).await.unwrap();
        drop(sender);
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(enforcer.calls(), 0);
        assert!(dead.snapshot().is_empty());
    }
}

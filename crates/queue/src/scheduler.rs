//! Scheduled jobs for periodic maintenance tasks.

#![allow(missing_docs)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use warden_common::AppResult;
use warden_common::config::SchedulerSettings;

/// Scheduled job types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledJob {
    /// Clear expired mutes and announce them.
    SweepExpiredMutes,
    /// Destroy admin panel sessions past their deadline.
    SweepExpiredSessions,
    /// Remove all-zero infraction records.
    CompactStore,
}

impl ScheduledJob {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SweepExpiredMutes => "sweep_expired_mutes",
            Self::SweepExpiredSessions => "sweep_expired_sessions",
            Self::CompactStore => "compact_store",
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval for the expired-mute sweep (default: 30 seconds).
    pub mute_sweep_interval: Duration,
    /// Interval for the expired-session sweep (default: 30 seconds).
    pub session_sweep_interval: Duration,
    /// Interval for store compaction (default: 1 hour).
    pub compaction_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&SchedulerSettings::default())
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            mute_sweep_interval: Duration::from_secs(settings.mute_sweep_interval_secs),
            session_sweep_interval: Duration::from_secs(settings.session_sweep_interval_secs),
            compaction_interval: Duration::from_secs(settings.compaction_interval_secs),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Clear expired mutes; returns how many were cleared.
    async fn sweep_expired_mutes(&self) -> AppResult<u64>;

    /// Destroy expired sessions; returns how many were destroyed.
    async fn sweep_expired_sessions(&self) -> AppResult<u64>;

    /// Compact the infraction store; returns how many records were removed.
    async fn compact_store(&self) -> AppResult<u64>;
}

/// Run `job` every `period` until the task is aborted.
///
/// A failed run is logged and retried on the next tick. Ticks missed while
/// a run is slow are not replayed in a burst.
fn spawn_periodic<F, Fut>(job: ScheduledJob, period: Duration, run: F) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<u64>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match run().await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(job = job.name(), count, "Scheduled job finished");
                    }
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Scheduled job failed");
                }
            }
        }
    })
}

/// Start one task per scheduled job. Abort the returned handles to stop.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: &SchedulerConfig,
    executor: Arc<E>,
) -> Vec<JoinHandle<()>> {
    let executor_mute = executor.clone();
    let executor_session = executor.clone();
    let executor_compact = executor;

    vec![
        spawn_periodic(ScheduledJob::SweepExpiredMutes, config.mute_sweep_interval, move || {
            let executor = executor_mute.clone();
            async move { executor.sweep_expired_mutes().await }
        }),
        spawn_periodic(
            ScheduledJob::SweepExpiredSessions,
            config.session_sweep_interval,
            move || {
                let executor = executor_session.clone();
                async move { executor.sweep_expired_sessions().await }
            },
        ),
        spawn_periodic(ScheduledJob::CompactStore, config.compaction_interval, move || {
            let executor = executor_compact.clone();
            async move { executor.compact_store().await }
        }),
    ]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use warden_common::AppError;

    #[derive(Default)]
    struct CountingExecutor {
        mutes: AtomicU64,
        sessions: AtomicU64,
        compactions: AtomicU64,
    }

    #[async_trait::async_trait]
    impl JobExecutor for CountingExecutor {
        async fn sweep_expired_mutes(&self) -> AppResult<u64> {
            self.mutes.fetch_add(1, Ordering::SeqCst);
            Err(AppError::StoreUnavailable("offline".to_string()))
        }

        async fn sweep_expired_sessions(&self) -> AppResult<u64> {
            self.sessions.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn compact_store(&self) -> AppResult<u64> {
            self.compactions.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.mute_sweep_interval, Duration::from_secs(30));
        assert_eq!(config.session_sweep_interval, Duration::from_secs(30));
        assert_eq!(config.compaction_interval, Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_job_keeps_ticking() {
        let executor = Arc::new(CountingExecutor::default());
        let config = SchedulerConfig {
            mute_sweep_interval: Duration::from_secs(30),
            session_sweep_interval: Duration::from_secs(30),
            compaction_interval: Duration::from_secs(3600),
        };

        let handles = run_scheduler(&config, executor.clone());
        tokio::time::sleep(Duration::from_secs(95)).await;
        for handle in handles {
            handle.abort();
        }

        assert_eq!(executor.mutes.load(Ordering::SeqCst), 4);
        assert_eq!(executor.sessions.load(Ordering::SeqCst), 4);
        assert_eq!(executor.compactions.load(Ordering::SeqCst), 1);
    }
}

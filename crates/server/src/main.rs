//! Warden bot entry point.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_common::{Config, RetryConfig};
use warden_core::{
    Collaborators, ControllerSettings, InboundEvent, InfractionStore, ModerationController,
    MuteSweeper, PersistentActionLog, ReconciliationContext, ReconciliationService, SystemClock,
};
use warden_db::repositories::{
    ActionLogRepository, ConversationSessionRepository, InfractionRepository,
    ProcessedEventRepository,
};
use warden_queue::{
    ChatDispatcher, EventHandler, ModerationJobs, SchedulerConfig, run_scheduler,
};
use warden_telegram::{TelegramClient, TelegramGateway, UpdatePoller};

/// Grace period for in-flight chat events on shutdown.
const DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Acknowledges button presses before handing events to the controller.
struct BotHandler {
    controller: Arc<ModerationController>,
    client: TelegramClient,
}

#[async_trait]
impl EventHandler for BotHandler {
    async fn handle(&self, event: InboundEvent) {
        if let InboundEvent::Callback(cb) = &event {
            if let Err(e) = self.client.answer_callback_query(&cb.callback_id).await {
                warn!(error = %e, "Failed to answer callback query");
            }
        }
        self.controller.dispatch(&event).await;
    }
}

/// Feed polled updates to the dispatcher until the task is dropped.
async fn poll_updates<H: EventHandler + 'static>(
    mut poller: UpdatePoller,
    dispatcher: &ChatDispatcher<H>,
) {
    loop {
        match poller.poll().await {
            Ok(events) => {
                for event in events {
                    dispatcher.submit(event);
                }
            }
            Err(e) => tokio::time::sleep(UpdatePoller::backoff(&e)).await,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warden=debug,sea_orm=info".into()),
        )
        .init();

    info!("Starting warden...");

    let config = Config::load().context("failed to load configuration")?;

    // Connect to database
    let db = warden_db::init(&config)
        .await
        .context("failed to connect to database")?;
    info!("Connected to database");

    info!("Running database migrations...");
    warden_db::migrate(&db).await?;
    info!("Migrations completed");

    let db = Arc::new(db);
    let store = Arc::new(InfractionStore::new(Arc::new(InfractionRepository::new(
        Arc::clone(&db),
    ))));
    let sessions = Arc::new(ConversationSessionRepository::new(Arc::clone(&db)));
    let processed = Arc::new(ProcessedEventRepository::new(Arc::clone(&db)));
    let audit = Arc::new(PersistentActionLog::new(ActionLogRepository::new(
        Arc::clone(&db),
    )));

    // Bot API
    let client = TelegramClient::new(&config.bot).context("failed to build Bot API client")?;
    let gateway = Arc::new(TelegramGateway::new(client.clone()));

    let clock = Arc::new(SystemClock);
    let settings = ControllerSettings::from(&config.moderation);
    let enforcement_timeout = settings.enforcement_timeout;

    // Reconciliation workers retry enforcement calls that failed inline
    let reconciliation = ReconciliationService::new();
    let controller = Arc::new(ModerationController::new(
        Arc::clone(&store),
        sessions,
        processed,
        Collaborators {
            authorizer: gateway.clone(),
            enforcer: gateway.clone(),
            notifier: gateway.clone(),
            reconciliation: Arc::new(reconciliation.sender()),
            audit,
        },
        clock.clone(),
        settings,
    ));
    let reconciliation_handle = reconciliation.start(ReconciliationContext {
        enforcer: gateway,
        store: Arc::clone(&store),
        retry: RetryConfig::from(&config.retry),
        timeout: enforcement_timeout,
    });
    info!("Reconciliation workers started");

    // Periodic sweeps
    let jobs = Arc::new(ModerationJobs::new(
        MuteSweeper::new(Arc::clone(&store), clock),
        Arc::clone(&store),
        Arc::clone(&controller),
    ));
    let scheduler_handles = run_scheduler(&SchedulerConfig::from(&config.scheduler), jobs);
    info!("Scheduler started");

    let dispatcher = ChatDispatcher::new(
        Arc::new(BotHandler {
            controller: Arc::clone(&controller),
            client: client.clone(),
        }),
        config.moderation.chat_idle_timeout(),
    );

    info!(
        warn_threshold = config.moderation.warn_threshold,
        "Warden is polling for updates"
    );
    tokio::select! {
        () = poll_updates(UpdatePoller::new(client), &dispatcher) => {},
        () = shutdown_signal() => {},
    }

    info!("Draining chat workers...");
    dispatcher.shutdown(DRAIN_GRACE).await;

    for handle in scheduler_handles {
        handle.abort();
        let _ = handle.await;
    }

    // The controller owns the last reconciliation sender; once every holder
    // is gone the workers finish their queued jobs and stop.
    drop(dispatcher);
    drop(controller);
    if tokio::time::timeout(DRAIN_GRACE, reconciliation_handle)
        .await
        .is_err()
    {
        warn!("Reconciliation workers did not stop in time");
    }

    info!("Server shutdown complete");
    Ok(())
}

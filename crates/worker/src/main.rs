use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use triage_events::{EmailConfig, EmailDelivery, EventBus, WebhookDelivery};
use triage_workflow::pg::PgStore;
use triage_workflow::transport::DeliveryTransport;
use triage_workflow::{
    Collaborators, EngineConfig, SlaMonitor, SlaMonitorConfig, SystemClock, TransitionEngine,
};

mod config;
mod notifications;

use config::WorkerConfig;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "triage_worker=debug,triage_workflow=debug".into());
    if config.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    tracing::info!("Starting triage worker");

    // --- Database ---
    let pool = triage_db::create_pool_with(&config.database_url, config.max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!(max_connections = config.max_connections, "Database pool created");

    triage_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    triage_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgStore::new(pool));
    let root = CancellationToken::new();

    // --- Delivery ---
    let bus = Arc::new(EventBus::default());
    // Cancelled only after async actions have drained.
    let consumer_cancel = CancellationToken::new();
    let consumer = tokio::spawn(notifications::run(bus.subscribe(), consumer_cancel.clone()));

    let email = EmailConfig::from_env().map(EmailDelivery::new);
    if email.is_none() {
        tracing::warn!("SMTP_HOST not set, email actions will fail");
    }

    let engine_config = EngineConfig::from_env();
    let webhook = WebhookDelivery::new(engine_config.webhook_timeout)
        .expect("Failed to build webhook HTTP client");
    let transport = Arc::new(DeliveryTransport::new(bus, email, webhook));

    // --- Transition engine ---
    let collaborators = Collaborators::from_store(store.clone(), transport);
    let engine = TransitionEngine::new(&collaborators, &engine_config);
    tracing::info!(
        webhook_timeout_secs = engine_config.webhook_timeout.as_secs(),
        "Transition engine ready"
    );

    // --- SLA monitor ---
    let monitor = Arc::new(SlaMonitor::new(
        store,
        Arc::new(SystemClock),
        SlaMonitorConfig::from_env(),
    ));
    monitor.start(&root);

    shutdown_signal().await;

    // --- Post-shutdown cleanup ---
    tracing::info!("Shutting down background services");
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    root.cancel();
    if !monitor.shutdown(shutdown_timeout).await {
        tracing::warn!(
            timeout_secs = config.shutdown_timeout_secs,
            "SLA monitor did not stop within the shutdown timeout"
        );
    }

    let in_flight = engine.executor().in_flight();
    if tokio::time::timeout(shutdown_timeout, engine.executor().drain())
        .await
        .is_err()
    {
        tracing::warn!(
            in_flight,
            timeout_secs = config.shutdown_timeout_secs,
            "Async actions still running at shutdown"
        );
    }

    consumer_cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), consumer).await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}

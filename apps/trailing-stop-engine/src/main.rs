//! Trailing Stop Engine Binary
//!
//! Runs one feed per configured broker, evaluates every tick against the
//! open orders in the order store and submits market exits.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trailing-stop-engine
//! ```
//!
//! # Environment Variables
//!
//! ## Brokers (at least one)
//! - `ZERODHA_API_KEY`, `ZERODHA_ACCESS_TOKEN`: enable Zerodha
//! - `UPSTOX_ACCESS_TOKEN`: enable Upstox
//!
//! ## Optional
//! - `ORDER_DB_PATH`: SQLite order database (default: orders.db)
//! - `FEED_RECONNECT_DELAY_SECS`: feed reconnect delay (default: 5)
//! - `EXIT_SUBMIT_MAX_ATTEMPTS`: exit order attempts (default: 3)
//! - `PRICE_REFRESH_INTERVAL_SECS`: REST price polling while a feed is down (default: 10, 0 disables)
//! - `METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use trailing_stop_engine::infrastructure::broker::build_http_client;
use trailing_stop_engine::infrastructure::telemetry;
use trailing_stop_engine::{
    Broker, BrokerSessions, EngineConfig, ExitOrderQueue, FeedConnection, FeedPipeline,
    FeedProtocol, FeedSubscriptions, KiteFeed, KiteTradingClient, OrderIntake, PriceRefresher,
    SqliteOrderStore, SubmissionWorker, SubscriptionManager, UpstoxFeed, UpstoxTradingClient,
    init_metrics,
};

/// Time allowed for the exit worker to drain after shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting trailing stop engine");

    let config = EngineConfig::from_env()?;
    log_config(&config);
    if !config.has_broker() {
        anyhow::bail!("no broker configured; set ZERODHA_* or UPSTOX_ACCESS_TOKEN");
    }

    if config.metrics_port > 0 {
        init_metrics(config.metrics_port)?;
        tracing::info!(port = config.metrics_port, "Metrics exporter listening");
    }

    let store = Arc::new(SqliteOrderStore::open(&config.order_db_path).await?);
    let http = build_http_client(config.broker_http_timeout)?;

    // Trading sessions
    let sessions = Arc::new(BrokerSessions::new());
    if let Some(credentials) = &config.zerodha {
        sessions.open(Arc::new(KiteTradingClient::new(
            http.clone(),
            &config.endpoints.kite_api_url,
            credentials.clone(),
        )));
    }
    if let Some(credentials) = &config.upstox {
        sessions.open(Arc::new(UpstoxTradingClient::new(
            http.clone(),
            &config.endpoints.upstox_api_url,
            credentials.clone(),
        )));
    }

    // One subscription set per broker feed, seeded from open orders
    let mut subscriptions = FeedSubscriptions::new();
    for broker in sessions.brokers() {
        subscriptions = subscriptions.with_feed(broker, Arc::new(SubscriptionManager::new()));
    }
    OrderIntake::new(Arc::clone(&store))
        .with_subscriptions(subscriptions.clone())
        .restore_subscriptions()
        .await
        .context("failed to load open orders")?;

    // Exit queue and its single worker
    let (exits, exit_rx) = ExitOrderQueue::new();
    let worker = SubmissionWorker::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        config.submission.clone(),
        exit_rx,
    )
    .with_subscriptions(subscriptions.clone());
    let worker_task = tokio::spawn(worker.run());

    let pipeline = Arc::new(
        FeedPipeline::new(Arc::clone(&store), Arc::clone(&sessions), exits.clone())
            .with_subscriptions(subscriptions.clone()),
    );

    let shutdown_token = CancellationToken::new();
    let reconnect = config.feed.reconnect_config();
    let mut feed_tasks = Vec::new();
    let mut refresher = PriceRefresher::new(
        Arc::clone(&store),
        Arc::clone(&sessions),
        exits.clone(),
        config.price_refresh_interval,
        shutdown_token.child_token(),
    );

    if let (Some(credentials), Some(manager)) =
        (&config.zerodha, subscriptions.manager(Broker::Zerodha))
    {
        let connection = FeedConnection::new(
            KiteFeed::new(&config.endpoints.kite_ws_url, credentials),
            Arc::clone(&pipeline),
            Arc::clone(manager),
            reconnect.clone(),
            shutdown_token.child_token(),
        );
        refresher = refresher.with_feed(connection.handle());
        feed_tasks.push(spawn_feed(connection));
    }

    if let (Some(credentials), Some(manager)) =
        (&config.upstox, subscriptions.manager(Broker::Upstox))
    {
        let connection = FeedConnection::new(
            UpstoxFeed::new(http.clone(), &config.endpoints.upstox_api_url, credentials.clone()),
            Arc::clone(&pipeline),
            Arc::clone(manager),
            reconnect.clone(),
            shutdown_token.child_token(),
        );
        refresher = refresher.with_feed(connection.handle());
        feed_tasks.push(spawn_feed(connection));
    }

    let refresher_task = tokio::spawn(refresher.run());

    tracing::info!(brokers = ?sessions.brokers(), "Engine ready");

    await_shutdown(&shutdown_token).await;

    for task in feed_tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Feed task panicked");
        }
    }
    if let Err(e) = refresher_task.await {
        tracing::error!(error = %e, "Price refresher panicked");
    }

    if exits.shutdown().is_err() {
        tracing::warn!("Exit worker already stopped");
    }
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, worker_task).await {
        Ok(Ok(stats)) => tracing::info!(
            submitted = stats.submitted,
            failed = stats.failed,
            dropped = stats.dropped,
            "Exit worker stopped"
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Exit worker panicked"),
        Err(_) => tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Exit worker did not drain in time"
        ),
    }

    sessions.close_all();
    tracing::info!("Trailing stop engine stopped");
    Ok(())
}

fn spawn_feed<P>(connection: FeedConnection<P, FeedPipeline<SqliteOrderStore>>) -> JoinHandle<()>
where
    P: FeedProtocol + 'static,
{
    let broker = connection.handle().broker();
    tokio::spawn(async move {
        if let Err(e) = connection.run().await {
            tracing::error!(%broker, error = %e, "Feed stopped with error");
        }
    })
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &EngineConfig) {
    tracing::info!(
        order_db = %config.order_db_path.display(),
        zerodha = config.zerodha.is_some(),
        upstox = config.upstox.is_some(),
        metrics_port = config.metrics_port,
        price_refresh_secs = config.price_refresh_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        kite_api = %config.endpoints.kite_api_url,
        kite_ws = %config.endpoints.kite_ws_url,
        upstox_api = %config.endpoints.upstox_api_url,
        "Broker endpoints"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: &CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}

//! `heatsync-core`: MQTT telemetry in, Postgres readings and median buckets
//! out, threshold alerts by email.
//!
//! Startup order matters. Tracing comes first so config errors are visible,
//! the schema exists before any store is handed out, and the aggregation
//! catch-up pass finishes before the cron tiers start so the first tick never
//! races it. The MQTT listener runs as a detached task; the HTTP read API
//! owns the main task until ctrl-c.
//!
//! Logging knobs (read here, not in [`config`]):
//! - `RUST_LOG` wins when set
//! - `HEATSYNC_LOG_LEVEL` – `trace|debug|info|warn|error` (default: `debug`)
//! - `HEATSYNC_SPAN_EVENTS` – `full`, `enter_exit`, or close-only by default
//! - `FORCE_COLOR` – force ANSI on/off, otherwise detected from the TTY
use std::{env, sync::Arc};

use axum::Router;
use chrono::Utc;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::Result;

mod aggregate;
mod alerts;
mod config;
mod error;
mod gate;
mod ingest;
mod models;
mod mqtt;
mod routes;
mod schema;
mod sinks;
mod store;

pub use config::Config;

use aggregate::scheduler::{self, AggregationScheduler};
use aggregate::Aggregator;
use alerts::AlertEvaluator;
use ingest::Ingestor;
use sinks::{BroadcastFanout, LogNotifier, NotificationSink, SmtpNotifier};
use store::PgStore;

// ---

/// Buffered live updates per fan-out subscriber.
const FANOUT_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow::anyhow!("Database connection failed: {}", e))?;

    tracing::info!(pool_max = cfg.db_pool_max, "Database pool ready");

    schema::create_schema(&pool).await?;

    let store = Arc::new(PgStore::new(pool));

    let notifier: Arc<dyn NotificationSink> = match &cfg.smtp {
        Some(smtp) => Arc::new(SmtpNotifier::new(smtp)?),
        None => Arc::new(LogNotifier),
    };
    let evaluator = AlertEvaluator::new(store.clone(), notifier, cfg.alert_offset);
    let fanout = Arc::new(BroadcastFanout::new(FANOUT_CAPACITY));
    let ingestor = Arc::new(Ingestor::new(store.clone(), store.clone(), evaluator, fanout));

    let aggregation = if cfg.aggregation_enabled {
        let aggregator = Arc::new(Aggregator::new(store.clone(), store.clone()));
        scheduler::catch_up(&aggregator, Utc::now()).await;
        Some(AggregationScheduler::start(aggregator).await?)
    } else {
        tracing::info!("Aggregation disabled");
        None
    };

    tokio::spawn(mqtt::run_listener(cfg.clone(), ingestor));

    // Routes gateway assembles every subrouter.
    let app: Router = routes::router(routes::ApiState {
        readings: store.clone(),
        buckets: store,
    });

    tracing::info!("Listening on {}", cfg.http_bind);

    let listener = tokio::net::TcpListener::bind(cfg.http_bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(aggregation) = aggregation {
        aggregation.shutdown().await?;
    }

    Ok(())
}

// ---

async fn shutdown_signal() {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Tri-state env flag: `Some(true)`/`Some(false)` when set to a recognised
/// value, `None` otherwise.
fn env_flag(var_name: &str) -> Option<bool> {
    match env::var(var_name).ok()?.as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

/// Install the global compact fmt subscriber. Call once, before any event.
fn init_tracing() {
    // ---
    let span_events = match env::var("HEATSYNC_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let ansi = env_flag("FORCE_COLOR").unwrap_or_else(|| std::io::stdout().is_terminal());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = env::var("HEATSYNC_LOG_LEVEL")
            .ok()
            .filter(|l| matches!(l.as_str(), "trace" | "debug" | "info" | "warn" | "error"))
            .unwrap_or_else(|| "debug".to_string());
        // Per-query and per-packet chatter stays out of debug output.
        EnvFilter::new(format!("{level},sqlx::query=warn,rumqttc=info"))
    });

    tracing_subscriber::fmt()
        .compact()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(ansi)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .init();
}

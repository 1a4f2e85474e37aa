mod app;
mod backoff;
mod config;
mod degraded;
mod error;
mod gate;
mod handlers;
mod metrics;
mod models;
mod presets;
mod rate_limit;
mod state;
mod store;

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backoff::{BackoffConfig, ViolationBackoff};
use crate::config::Args;
use crate::degraded::ProcessLocalCounters;
use crate::rate_limit::FixedWindowLimiter;

// how often in-process maps drop expired entries
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // parse cli arguments
    let args = Args::parse();

    let (store, memory) = store::connect_store(args.redis_url.as_deref()).await;

    // spawn the purge worker when counters live in this process
    if let Some(memory) = memory {
        info!("Using in-memory counter store");
        tokio::spawn(store::purge_worker(memory, PURGE_INTERVAL, "counters"));
    } else {
        info!("Using redis counter store");
    }

    // degraded-mode windows are touched only during outages, sweep them too
    let local = Arc::new(ProcessLocalCounters::new());
    tokio::spawn(store::purge_worker(local.clone(), PURGE_INTERVAL, "degraded"));

    let limiter = Arc::new(FixedWindowLimiter::new(store.clone(), local));
    let backoff = Arc::new(ViolationBackoff::new(
        store,
        BackoffConfig {
            base: Duration::from_secs(args.backoff_base_secs),
            max: Duration::from_secs(args.backoff_max_secs),
            violation_ttl: Duration::from_secs(args.violation_ttl_secs),
        },
    ));

    let state = app::build_state(limiter, args.admin_password_sha256.clone());
    let app = app::build_app(state, backoff);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(port = args.port, "Gateway running");
    info!(
        base_secs = args.backoff_base_secs,
        max_secs = args.backoff_max_secs,
        "Violation backoff configured"
    );

    // peer addresses feed the client identifier when no proxy headers are set
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

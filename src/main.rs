//! Ticker relay — binary entrypoint.
//! Serves the cached, always-available ticker feed to local widgets.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ticker_feed::api::{self, AppState};
use ticker_feed::metrics::Metrics;
use ticker_feed::{TickerCache, TickerClient, TickerConfig};

const ENV_LOG_FORMAT: &str = "TICKER_LOG_FORMAT";
/// Entries nobody has looked at for this long are dropped.
const PRUNE_IDLE_AFTER: Duration = Duration::from_secs(300);

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ticker=info,warn"));

    let json = std::env::var(ENV_LOG_FORMAT)
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "ticker", error = %e, "ctrl-c handler failed");
    }
    tracing::info!(target: "ticker", "shutting down");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = TickerConfig::load_default().context("loading ticker config")?;
    let cadences = cfg.cadences();
    let client = TickerClient::from_config(&cfg).context("building ticker client")?;
    let cache = TickerCache::with_cadences(Arc::new(client), cadences);

    let metrics = Metrics::init(&cadences)?;

    let janitor = cache.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_IDLE_AFTER);
        loop {
            tick.tick().await;
            let n = janitor.prune_idle(PRUNE_IDLE_AFTER);
            if n > 0 {
                tracing::debug!(target: "ticker", pruned = n, "pruned idle cache entries");
            }
        }
    });

    let router = api::create_router(AppState { cache }).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.relay_addr)
        .await
        .with_context(|| format!("binding relay on {}", cfg.relay_addr))?;
    tracing::info!(
        target: "ticker",
        addr = %cfg.relay_addr,
        upstream = %cfg.base_url,
        "ticker relay listening"
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server")?;
    Ok(())
}

// =============================================================================
// Nanopulse Terminal — Main Entry Point
// =============================================================================
//
// Headless client for the nanopulse trading engine: keeps a live, throttled
// snapshot of engine state from the WebSocket feed and logs a one-line summary
// whenever it advances. Order submission goes through the REST client.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod bus;
mod config;
mod connection;
mod orders;
mod store;
mod types;

use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::bus::EventBus;
use crate::config::SyncConfig;
use crate::connection::ConnectionManager;
use crate::orders::OrderClient;
use crate::store::StateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Nanopulse Terminal — Starting Up                  ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = SyncConfig::load("sync_config.json").unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        SyncConfig::default()
    });
    config.apply_env_overrides();

    info!(
        ws_url = %config.ws_url,
        api_url = %config.api_url,
        min_update_interval_ms = config.min_update_interval_ms,
        "sync layer configured"
    );

    // ── 2. Build the sync core ───────────────────────────────────────────
    let bus = EventBus::new();
    let store = StateStore::new(&config);
    let _store_subscription = store.attach(&bus);

    let manager = ConnectionManager::new(&config, bus.clone());
    manager.connect();

    // ── 3. Probe the engine's REST side once ─────────────────────────────
    let order_client = OrderClient::new(config.api_url.clone());
    tokio::spawn(async move {
        match order_client.health().await {
            Ok(health) => info!(health = %health, "engine health"),
            Err(e) => warn!(error = %e, "engine health probe failed"),
        }
    });

    // ── 4. Snapshot summary loop (stand-in for a rendering layer) ───────
    let render_store = store.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        let mut last_seen = render_store.version();
        loop {
            interval.tick().await;

            let version = render_store.version();
            if version == last_seen {
                continue;
            }
            last_seen = version;

            let snapshot = render_store.snapshot();
            let clock = snapshot.timestamp.map(|ns| {
                chrono::DateTime::from_timestamp_nanos(ns)
                    .format("%H:%M:%S%.3f")
                    .to_string()
            });
            info!(
                status = %render_store.status(),
                engine_time = ?clock,
                best_bid = ?snapshot.best_bid,
                best_ask = ?snapshot.best_ask,
                spread = ?snapshot.spread,
                latency_us = snapshot.latency_us,
                queue_depth = snapshot.queue_depth,
                mode = %snapshot.mode,
                total_trades = snapshot.total_trades,
                books = snapshot.order_books.len(),
                history = render_store.recent_trades().len(),
                "engine state"
            );
            if let Some(error) = render_store.last_error() {
                warn!(error = %error, "connection degraded");
            }
        }
    });

    info!("Sync layer running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — closing engine link");
    manager.disconnect();

    info!("Nanopulse terminal shut down complete.");
    Ok(())
}

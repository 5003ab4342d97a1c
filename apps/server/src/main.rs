//! # Tally Server
//!
//! ## Startup Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Server Startup                                  │
//! │                                                                         │
//! │  1. Initialize Logging ─────────────────────────────────────────────►   │
//! │     └── tracing-subscriber with RUST_LOG env filter                     │
//! │                                                                         │
//! │  2. Load Configuration ─────────────────────────────────────────────►   │
//! │     └── defaults → tally.toml → TALLY_* env                             │
//! │                                                                         │
//! │  3. Open Database ──────────────────────────────────────────────────►   │
//! │     └── SQLite (WAL) + embedded migrations                              │
//! │                                                                         │
//! │  4. Start Idempotency Purge ────────────────────────────────────────►   │
//! │                                                                         │
//! │  5. Serve HTTP until Ctrl+C / SIGTERM ──────────────────────────────►   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```text
//! tally-server [--config <path>]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tally_db::Database;
use tally_server::{build_router, AppState, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Tally server...");

    let config = ServerConfig::load(config_path_from_args()).context("Failed to load configuration")?;
    let addr = config.socket_addr()?;
    info!(
        addr = %addr,
        db_path = %config.database.path.display(),
        commit_timeout_ms = config.checkout.commit_timeout_ms,
        max_attempts = config.checkout.max_attempts,
        "Configuration loaded"
    );

    let db = Database::new(config.db_config())
        .await
        .context("Failed to open database")?;
    info!("Database ready");

    let purge = tokio::spawn(purge_expired_keys(db.clone(), config.purge_interval()));

    let app = build_router(AppState::new(db.clone(), config.checkout_settings()));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    info!(addr = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    purge.abort();
    db.close().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Initializes the tracing subscriber.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug logs
/// - `RUST_LOG=tally=trace` - Show trace for tally crates only
/// - Default: `info,tally=debug,sqlx=warn`
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tally=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// `--config <path>` or `--config=<path>`.
fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    None
}

/// Deletes idempotency keys past their expiry, once per interval.
async fn purge_expired_keys(db: Database, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match db.idempotency().purge_expired(Utc::now()).await {
            Ok(0) => {}
            Ok(purged) => info!(purged, "Purged expired idempotency keys"),
            Err(e) => warn!(error = %e, "Idempotency purge failed"),
        }
    }
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}

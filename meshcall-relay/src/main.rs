//! meshcall signaling relay -- rendezvous server for full-mesh calls.
//!
//! An axum WebSocket server that lets endpoints join named channels and
//! exchange offer/answer/candidate payloads with every other member. The
//! relay never carries media and never looks inside the payloads.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8080
//! cargo run --bin meshcall-relay
//!
//! # Run on custom address and serve the client bundle
//! cargo run --bin meshcall-relay -- --bind 127.0.0.1:9000 --static-dir public
//!
//! # Or via environment variable
//! PORT=3000 cargo run --bin meshcall-relay
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use meshcall_relay::config::{RelayCliArgs, RelayConfig};
use meshcall_relay::relay::{self, RelayState};
use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() {
    let cli = RelayCliArgs::parse();

    // Load config from CLI args + config file + env vars + defaults.
    let config = match RelayConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());

    tracing::info!(addr = %config.bind_addr, "starting meshcall relay");
    if let Some(dir) = &config.static_dir {
        tracing::info!(dir = %dir.display(), "serving client bundle");
    }

    let state = Arc::new(RelayState::with_config(
        config.max_message_size,
        config.static_dir.clone(),
    ));

    match relay::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}

/// Installs the tracing subscriber.
///
/// Logs go to stderr unless a file is configured, in which case they are
/// written through a non-blocking appender whose guard must be held until
/// shutdown.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| {
        let dir = p
            .parent()
            .filter(|d| !d.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        Some((dir, p.file_name()?))
    }) else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

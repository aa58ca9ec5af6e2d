//! `mdrelay` server -- presence, chat and signaling relay.
//!
//! Runs two independent WebSocket listeners: the presence relay (chat,
//! presence, `rtc:*` forwarding) and the collaboration room server (rooms
//! addressed by `/room/{id}`). Either can be disabled.
//!
//! # Usage
//!
//! ```bash
//! # Relay on 0.0.0.0:3001, collaboration rooms on 0.0.0.0:8990
//! cargo run --bin mdrelay
//!
//! # Custom relay port and default room
//! cargo run --bin mdrelay -- --port 4001 --default-room lobby
//!
//! # Or via environment variables
//! WS_PORT=4001 COLLAB_ENABLE=false cargo run --bin mdrelay
//! ```

use clap::Parser;
use mdrelay::config::{RelayCliArgs, RelayConfig};
use mdrelay::{collab, relay};

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

    // Initialize tracing with the resolved log level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let mut handles = Vec::new();

    if config.relay_enabled {
        let addr = config.relay_addr();
        tracing::info!(addr = %addr, default_room = %config.default_room, "starting presence relay");
        match relay::start_server(&addr, config.default_room.clone()).await {
            Ok((bound_addr, handle)) => {
                tracing::info!(addr = %bound_addr, "presence relay listening");
                handles.push(handle);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start presence relay");
                std::process::exit(1);
            }
        }
    }

    if config.collab_enabled {
        let addr = config.collab_addr();
        tracing::info!(addr = %addr, "starting collaboration room server");
        match collab::start_server(&addr, &config.public_host).await {
            Ok((bound_addr, _service, handle)) => {
                tracing::info!(addr = %bound_addr, "collaboration room server listening");
                handles.push(handle);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to start collaboration room server");
                std::process::exit(1);
            }
        }
    }

    if handles.is_empty() {
        tracing::warn!("both the presence relay and collaboration rooms are disabled");
        return;
    }

    for result in futures_util::future::join_all(handles).await {
        if let Err(e) = result {
            tracing::error!(error = %e, "server task failed");
        }
    }
}

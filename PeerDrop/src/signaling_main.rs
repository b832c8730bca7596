//! Entry point of the signaling relay.

use std::net::TcpListener;
use std::sync::Arc;

use tracing::{info, warn};

use peerdrop::config::AppConfig;
use peerdrop::logger;
use peerdrop::server::{self, state::RelayState, tls::build_tls_config};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "server.conf".to_string());
    let (config, load_error) = match AppConfig::load(&config_path) {
        Ok(cfg) => (cfg, None),
        Err(err) => (AppConfig::default(), Some(err)),
    };
    let _guard = logger::init(&config.log_file, "info")?;
    if let Some(err) = load_error {
        warn!(path = %config_path, error = %err, "using default configuration");
    }

    let listener = TcpListener::bind(&config.server_addr)?;
    let state = Arc::new(RelayState::new(config.max_clients));
    let tls_config = build_tls_config()?;
    info!(addr = %config.server_addr, "relay started, TLS with a self-signed certificate");

    server::serve(listener, state, tls_config)?;
    Ok(())
}

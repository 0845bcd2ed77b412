//! Health endpoint server
//!
//! Answers liveness probes for the training service. Any `GET` returns
//! `200 OK` with body `OK`; `/api/health` returns a small JSON status.

mod api;
mod handlers;
mod state;

pub use api::create_router;
pub use state::AppState;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::config::AppConfig;
use crate::error::{DrytimeError, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Minimum seconds between two logged probes
    pub probe_log_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            probe_log_interval_secs: 600,
        }
    }
}

impl From<&AppConfig> for ServerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            host: config.health_host.clone(),
            port: config.health_port,
            ..Self::default()
        }
    }
}

/// Serve until `shutdown` resolves
pub async fn run_server<F>(config: ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| DrytimeError::Config(format!("invalid health address: {}", e)))?;

    let state = Arc::new(AppState::new(config));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Health server shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_app_config() {
        let app = AppConfig {
            health_port: 9000,
            ..AppConfig::default()
        };
        let config = ServerConfig::from(&app);
        assert_eq!(config.port, 9000);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.probe_log_interval_secs, 600);
    }
}

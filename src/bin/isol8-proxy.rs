//! isol8-proxy - In-container filtering proxy entry point
//!
//! Started by the engine inside filtered containers. Policy and paths come
//! from the environment:
//!
//! - `ISOL8_PROXY_PORT`       loopback port to listen on
//! - `ISOL8_PROXY_WHITELIST`  JSON array of host regexes
//! - `ISOL8_PROXY_BLACKLIST`  JSON array of host regexes
//! - `ISOL8_PROXY_LOG`        path of the append-only audit log

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use isol8::config::NetworkFilter;
use isol8::constants::{PROXY_LOG_PATH, PROXY_PORT};
use isol8::proxy::{FilterPolicy, NetworkLogger, ProxyServer};

fn env_patterns(name: &str) -> anyhow::Result<Vec<String>> {
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => {
            serde_json::from_str(&raw).map_err(|e| anyhow::anyhow!("invalid {name}: {e}"))
        }
        _ => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port = std::env::var("ISOL8_PROXY_PORT")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(PROXY_PORT);
    let log_path =
        std::env::var("ISOL8_PROXY_LOG").unwrap_or_else(|_| PROXY_LOG_PATH.to_string());

    let filter = NetworkFilter {
        whitelist: env_patterns("ISOL8_PROXY_WHITELIST")?,
        blacklist: env_patterns("ISOL8_PROXY_BLACKLIST")?,
    };
    let policy = FilterPolicy::compile(&filter).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    tracing::info!(
        port,
        whitelist = filter.whitelist.len(),
        blacklist = filter.blacklist.len(),
        "Starting filtering proxy"
    );

    let logger = Arc::new(NetworkLogger::new(log_path));
    ProxyServer::new(policy, logger, port)
        .run()
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}

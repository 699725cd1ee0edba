//! Engine configuration
//!
//! `EngineOptions` is the long-lived, per-engine configuration. It is built
//! in code (or deserialized from an external config loader) and overlaid by
//! per-request overrides at execution time. The engine itself never reads a
//! config file; only the handful of `ISOL8_*` environment variables consumed
//! by the gateway are resolved here.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CPU_LIMIT, DEFAULT_GATEWAY_PORT, DEFAULT_INSTALL_TIMEOUT_MS, DEFAULT_MAX_CONCURRENT,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_MEMORY_LIMIT, DEFAULT_PIDS_LIMIT, DEFAULT_POOL_CLEAN,
    DEFAULT_POOL_DIRTY, DEFAULT_SANDBOX_SIZE, DEFAULT_TMP_SIZE,
};

/// Whether an engine reuses pooled workers or owns one dedicated container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Each execute may reuse a pooled worker, scrubbed between runs
    Ephemeral,
    /// One long-lived container owned by this engine instance
    Persistent,
}

/// Container network configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// No default route; all connect attempts fail
    None,
    /// Container shares the host network namespace
    Host,
    /// Egress only through the in-container filtering proxy
    Filtered,
}

/// Whether the seccomp profile is applied to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// Project seccomp profile + no-new-privileges
    Strict,
    /// No seccomp profile; reserved for privileged-install containers
    Unconfined,
}

/// Worker pool acquisition strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStrategy {
    /// Clean/dirty sub-pools with a background promoter
    Fast,
    /// Cleanup runs before every acquire returns
    Secure,
}

/// Host-regex allow/deny policy for filtered networking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkFilter {
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

/// Per-key pool capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSizes {
    pub clean: usize,
    pub dirty: usize,
}

impl Default for PoolSizes {
    fn default() -> Self {
        Self {
            clean: DEFAULT_POOL_CLEAN,
            dirty: DEFAULT_POOL_DIRTY,
        }
    }
}

/// Long-lived engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub mode: EngineMode,
    pub network: NetworkMode,
    pub network_filter: NetworkFilter,
    /// Memory limit as a size string, e.g. "512m"
    pub memory_limit: String,
    /// Fractional CPUs
    pub cpu_limit: f64,
    pub pids_limit: i64,
    /// Size of the /sandbox tmpfs, e.g. "256m"
    pub sandbox_size: String,
    /// Size of the /tmp tmpfs, e.g. "64m"
    pub tmp_size: String,
    pub security: SecurityMode,
    pub readonly_rootfs: bool,
    pub pool_strategy: PoolStrategy,
    pub pool_size: PoolSizes,
    /// Collect a network audit log for filtered executions
    pub log_network: bool,
    /// Global cap on concurrently admitted executions
    pub max_concurrent: usize,
    /// Byte cap on accumulated stdout/stderr
    pub max_output_bytes: usize,
    /// Timeout applied to package installation
    pub install_timeout_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            mode: EngineMode::Ephemeral,
            network: NetworkMode::None,
            network_filter: NetworkFilter::default(),
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            cpu_limit: DEFAULT_CPU_LIMIT,
            pids_limit: DEFAULT_PIDS_LIMIT,
            sandbox_size: DEFAULT_SANDBOX_SIZE.to_string(),
            tmp_size: DEFAULT_TMP_SIZE.to_string(),
            security: SecurityMode::Strict,
            readonly_rootfs: true,
            pool_strategy: PoolStrategy::Fast,
            pool_size: PoolSizes::default(),
            log_network: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            install_timeout_ms: DEFAULT_INSTALL_TIMEOUT_MS,
        }
    }
}

/// Gateway listen configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct ServeConfig {
    pub port: u16,
    pub api_key: String,
}

impl ServeConfig {
    /// Resolve port and key from the environment.
    ///
    /// Key comes from `ISOL8_API_KEY`; port from `ISOL8_PORT`, then `PORT`,
    /// then the built-in default. A missing key is an error for the caller
    /// to surface.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let api_key =
            std::env::var("ISOL8_API_KEY").map_err(|_| ConfigError::Missing("ISOL8_API_KEY"))?;

        let port = std::env::var("ISOL8_PORT")
            .or_else(|_| std::env::var("PORT"))
            .ok()
            .map(|raw| raw.parse().map_err(|_| ConfigError::InvalidValue("port")))
            .transpose()?
            .unwrap_or(DEFAULT_GATEWAY_PORT);

        Ok(Self { port, api_key })
    }

    pub fn new(port: u16, api_key: impl Into<String>) -> Self {
        Self {
            port,
            api_key: api_key.into(),
        }
    }
}

/// Version string reported by the gateway.
///
/// `ISOL8_VERSION` is embedded at build time when set; otherwise the crate
/// version is used.
pub fn version() -> &'static str {
    option_env!("ISOL8_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}

/// Configuration resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = EngineOptions::default();
        assert_eq!(opts.mode, EngineMode::Ephemeral);
        assert_eq!(opts.network, NetworkMode::None);
        assert_eq!(opts.memory_limit, "512m");
        assert_eq!(opts.pool_size.clean, 2);
        assert!(opts.readonly_rootfs);
        assert!(!opts.log_network);
    }

    #[test]
    fn test_options_deserialize_camel_case() {
        let opts: EngineOptions = serde_json::from_str(
            r#"{"network":"filtered","memoryLimit":"1g","poolStrategy":"secure","logNetwork":true}"#,
        )
        .unwrap();
        assert_eq!(opts.network, NetworkMode::Filtered);
        assert_eq!(opts.memory_limit, "1g");
        assert_eq!(opts.pool_strategy, PoolStrategy::Secure);
        assert!(opts.log_network);
        // Unspecified fields fall back to defaults
        assert_eq!(opts.cpu_limit, 1.0);
    }

    #[test]
    fn test_version_is_semver_like() {
        assert!(version().split('.').count() >= 2);
    }
}

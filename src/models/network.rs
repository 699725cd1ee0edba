//! Network audit log models shared by the proxy and the engine

use serde::{Deserialize, Serialize};

/// Outcome of a policy decision for one host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Allow,
    Block,
}

/// One record in the per-request network audit log.
///
/// HTTP requests carry `method`/`path`/`status_code`; CONNECT tunnels carry
/// the method `CONNECT` with `path` and `status_code` null.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkLogEntry {
    /// Milliseconds since the Unix epoch at decision time
    pub timestamp_ms: i64,
    pub host: String,
    pub method: String,
    pub path: Option<String>,
    pub status_code: Option<u16>,
    pub action: PolicyAction,
    /// Time spent serving the request or tunnel
    pub duration_ms: u64,
}

//! Application-wide constants
//!
//! This module contains all constant values used throughout the engine.
//! Constants are grouped by their purpose for better organization.

// =============================================================================
// EXECUTION DEFAULTS
// =============================================================================

/// Default wall-clock timeout for a single execution in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Default timeout for package installation in milliseconds
pub const DEFAULT_INSTALL_TIMEOUT_MS: u64 = 60_000;

/// Default cap on accumulated stdout/stderr bytes (1 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// Default number of concurrently admitted executions
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

/// Marker line appended to output that hit the byte cap
pub const TRUNCATION_MARKER: &str = "\n[output truncated]";

/// Marker appended to stderr when the wall-clock timer expires
pub const TIMEOUT_MARKER: &str = "EXECUTION TIMED OUT";

/// Exit code recorded for SIGKILL (timeout) and OOM kills
pub const EXIT_CODE_KILLED: i32 = 137;

/// Replacement for masked secret values in output
pub const SECRET_MASK: &str = "***";

// =============================================================================
// CONTAINER DEFAULTS
// =============================================================================

/// Default container memory limit
pub const DEFAULT_MEMORY_LIMIT: &str = "512m";

/// Default CPU limit (fractional cores)
pub const DEFAULT_CPU_LIMIT: f64 = 1.0;

/// Default pids limit per container
pub const DEFAULT_PIDS_LIMIT: i64 = 128;

/// Default size of the /sandbox tmpfs
pub const DEFAULT_SANDBOX_SIZE: &str = "256m";

/// Default size of the /tmp tmpfs
pub const DEFAULT_TMP_SIZE: &str = "64m";

/// Working directory for all sandboxed executions
pub const SANDBOX_DIR: &str = "/sandbox";

/// Non-root user all user code executes as
pub const SANDBOX_USER: &str = "sandbox";

/// Uid of the sandbox user inside the base images
pub const SANDBOX_UID: u32 = 1000;

/// In-container user the filtering proxy runs as
pub const PROXY_USER: &str = "proxy";

/// Uid of the proxy user inside the base images
pub const PROXY_UID: u32 = 1001;

// =============================================================================
// POOL DEFAULTS
// =============================================================================

/// Default number of pre-cleaned workers kept per pool key
pub const DEFAULT_POOL_CLEAN: usize = 2;

/// Default number of recently released workers kept per pool key
pub const DEFAULT_POOL_DIRTY: usize = 4;

/// Interval between dirty-to-clean promotion passes in milliseconds
pub const POOL_PROMOTE_INTERVAL_MS: u64 = 500;

/// Grace window drain waits for in-use workers before force-removal
pub const DRAIN_GRACE_MS: u64 = 5_000;

// =============================================================================
// NETWORK PROXY
// =============================================================================

/// Loopback port the in-container filtering proxy listens on
pub const PROXY_PORT: u16 = 8877;

/// Path of the proxy binary inside base images
pub const PROXY_BINARY_PATH: &str = "/usr/local/bin/isol8-proxy";

/// Directory holding the proxy's audit log, mounted as its own tmpfs
pub const PROXY_LOG_DIR: &str = "/var/log/isol8";

/// Append-only network audit log inside filtered containers
pub const PROXY_LOG_PATH: &str = "/var/log/isol8/network.jsonl";

// =============================================================================
// SUPPORTED RUNTIMES
// =============================================================================

/// Runtime identifiers
pub mod runtimes {
    pub const PYTHON: &str = "python";
    pub const NODE: &str = "node";
    pub const BUN: &str = "bun";
    pub const DENO: &str = "deno";
    pub const BASH: &str = "bash";

    /// All supported runtime identifiers
    pub const ALL: &[&str] = &[PYTHON, NODE, BUN, DENO, BASH];
}

/// Container images for each runtime
pub mod images {
    pub const PYTHON: &str = "isol8:python";
    pub const NODE: &str = "isol8:node";
    pub const BUN: &str = "isol8:bun";
    pub const DENO: &str = "isol8:deno";
    pub const BASH: &str = "isol8:bash";
}

// =============================================================================
// LABELS
// =============================================================================

/// Label set on every engine-created container, used by cleanup enumeration
pub const MANAGED_LABEL: &str = "isol8.managed";

/// Label recording the runtime image a worker was created from
pub const IMAGE_LABEL: &str = "isol8.image";

// =============================================================================
// GATEWAY
// =============================================================================

/// Default port for the remote execution gateway
pub const DEFAULT_GATEWAY_PORT: u16 = 3000;

// =============================================================================
// VALIDATION
// =============================================================================

/// Allowed characters in a package name passed to `--install`
pub const PACKAGE_NAME_PATTERN: &str = r"^[A-Za-z0-9_.@/=\-]+$";

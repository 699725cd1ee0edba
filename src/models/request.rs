//! Execution request model and validation

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{NetworkFilter, NetworkMode};
use crate::constants::{DEFAULT_TIMEOUT_MS, PACKAGE_NAME_PATTERN};
use crate::error::{SandboxError, SandboxResult};

static PACKAGE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PACKAGE_NAME_PATTERN).expect("package name pattern"));

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// An immutable, per-call execution request.
///
/// The optional limit fields override the engine's configured defaults for
/// this call only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    /// Program source
    pub code: String,
    /// Runtime tag: python, node, bun, deno, bash
    pub runtime: String,
    /// Extra files injected before the run; keys are absolute paths under /sandbox
    #[serde(default)]
    pub files: HashMap<String, Vec<u8>>,
    /// Environment merged into the exec for this call only
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Like `env`, but values are masked in output
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Packages installed before the run
    #[serde(default)]
    pub install_packages: Vec<String>,
    /// Bytes piped to the command's stdin
    #[serde(default)]
    pub stdin: Option<Vec<u8>>,
    /// Wall-clock timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    // Per-request overrides
    #[serde(default)]
    pub memory_limit: Option<String>,
    #[serde(default)]
    pub cpu_limit: Option<f64>,
    #[serde(default)]
    pub pids_limit: Option<i64>,
    #[serde(default)]
    pub sandbox_size: Option<String>,
    #[serde(default)]
    pub tmp_size: Option<String>,
    #[serde(default)]
    pub network: Option<NetworkMode>,
    #[serde(default)]
    pub network_filter: Option<NetworkFilter>,
}

impl ExecutionRequest {
    /// Minimal request: code plus runtime, everything else defaulted.
    pub fn new(code: impl Into<String>, runtime: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            runtime: runtime.into(),
            files: HashMap::new(),
            env: HashMap::new(),
            secrets: HashMap::new(),
            install_packages: Vec::new(),
            stdin: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            memory_limit: None,
            cpu_limit: None,
            pids_limit: None,
            sandbox_size: None,
            tmp_size: None,
            network: None,
            network_filter: None,
        }
    }

    /// Validate everything that does not require the runtime registry.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.timeout_ms == 0 {
            return Err(SandboxError::BadRequest(
                "timeoutMs must be greater than zero".to_string(),
            ));
        }
        for name in &self.install_packages {
            validate_package_name(name)?;
        }
        for path in self.files.keys() {
            validate_file_path(path)?;
        }
        Ok(())
    }
}

/// Validate a single package name against the allowed character set.
pub fn validate_package_name(name: &str) -> SandboxResult<()> {
    if name.is_empty() || !PACKAGE_NAME_RE.is_match(name) {
        return Err(SandboxError::BadRequest(format!(
            "invalid package name: {name:?}"
        )));
    }
    Ok(())
}

/// Validate an injected file path.
///
/// Files land in the container through the runtime's archive-extract API,
/// which writes through the daemon and is not stopped by the read-only
/// rootfs. The sandbox tmpfs is the only surface a request may write to, so
/// a path must be absolute, resolve under /sandbox/, and carry no `..`
/// components.
pub fn validate_file_path(path: &str) -> SandboxResult<()> {
    if !path.starts_with('/') {
        return Err(SandboxError::BadRequest(format!(
            "file path must be absolute: {path}"
        )));
    }
    if !path.starts_with("/sandbox/") {
        return Err(SandboxError::BadRequest(format!(
            "file path must be under /sandbox: {path}"
        )));
    }
    if path.split('/').any(|part| part == "..") {
        return Err(SandboxError::BadRequest(format!(
            "file path must not contain '..': {path}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_package_name() {
        assert!(validate_package_name("requests").is_ok());
        assert!(validate_package_name("numpy==2.1.0").is_ok());
        assert!(validate_package_name("@types/node").is_ok());
        assert!(validate_package_name("left-pad").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("rm -rf /").is_err());
        assert!(validate_package_name("pkg;echo").is_err());
    }

    #[test]
    fn test_validate_rejects_relative_file_path() {
        let mut req = ExecutionRequest::new("print(1)", "python");
        req.files.insert("data.txt".to_string(), b"x".to_vec());
        assert!(matches!(
            req.validate(),
            Err(SandboxError::BadRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_paths_outside_sandbox() {
        for path in ["/etc/passwd", "/tmp/x", "/sandboxed/x", "/sandbox"] {
            let mut req = ExecutionRequest::new("print(1)", "python");
            req.files.insert(path.to_string(), b"x".to_vec());
            assert!(
                matches!(req.validate(), Err(SandboxError::BadRequest(_))),
                "{path} must be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_traversal() {
        for path in [
            "/sandbox/../../etc/passwd",
            "/sandbox/..",
            "/sandbox/sub/../../../etc/shadow",
        ] {
            let mut req = ExecutionRequest::new("print(1)", "python");
            req.files.insert(path.to_string(), b"x".to_vec());
            assert!(
                matches!(req.validate(), Err(SandboxError::BadRequest(_))),
                "{path} must be rejected"
            );
        }
    }

    #[test]
    fn test_validate_accepts_sandbox_paths() {
        let mut req = ExecutionRequest::new("print(1)", "python");
        req.files
            .insert("/sandbox/data/input.txt".to_string(), b"x".to_vec());
        req.files
            .insert("/sandbox/notes..txt".to_string(), b"x".to_vec());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut req = ExecutionRequest::new("print(1)", "python");
        req.timeout_ms = 0;
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_deserialize_minimal_body() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"code":"print(1+1)","runtime":"python"}"#).unwrap();
        assert_eq!(req.timeout_ms, 30_000);
        assert!(req.files.is_empty());
        assert!(req.network.is_none());
        assert!(req.validate().is_ok());
    }
}

//! Runtime-specific adapters for sandboxed execution
//!
//! Each supported runtime maps to a pre-built container image plus the argv
//! shapes needed to run a program and install packages. The registry is a
//! closed enumeration: new runtimes are added by appending a module, not by
//! subclassing.

pub mod bash;
pub mod bun;
pub mod deno;
pub mod node;
pub mod python;

use crate::constants::{SANDBOX_DIR, runtimes};
use crate::error::{SandboxError, SandboxResult};

/// Adapter describing how one runtime executes inside its image
#[derive(Debug, Clone)]
pub struct RuntimeAdapter {
    name: String,
    image: String,
    extension: String,
    run_prefix: Vec<String>,
    install_prefix: Option<Vec<String>>,
    registry_patterns: Vec<String>,
}

impl RuntimeAdapter {
    /// Get the adapter for a runtime tag.
    pub fn get(name: &str) -> SandboxResult<Self> {
        match name {
            runtimes::PYTHON => Ok(python::adapter()),
            runtimes::NODE => Ok(node::adapter()),
            runtimes::BUN => Ok(bun::adapter()),
            runtimes::DENO => Ok(deno::adapter()),
            runtimes::BASH => Ok(bash::adapter()),
            _ => Err(SandboxError::UnknownRuntime(name.to_string())),
        }
    }

    /// Map a file extension to an adapter.
    pub fn detect(path: &str) -> SandboxResult<Self> {
        let ext = path.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        match ext {
            "py" => Ok(python::adapter()),
            "js" | "cjs" | "mjs" => Ok(node::adapter()),
            "ts" => Ok(bun::adapter()),
            "mts" => Ok(deno::adapter()),
            "sh" => Ok(bash::adapter()),
            _ => Err(SandboxError::UnknownRuntime(format!(
                "no runtime for file: {path}"
            ))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Absolute path of the main program file inside the sandbox.
    pub fn main_file(&self) -> String {
        format!("{SANDBOX_DIR}/main.{}", self.extension)
    }

    /// Argv that runs the program at `main_path`.
    pub fn command(&self, main_path: &str) -> Vec<String> {
        let mut argv = self.run_prefix.clone();
        argv.push(main_path.to_string());
        argv
    }

    /// Argv that installs `packages`, for runtimes that support installs.
    pub fn install_command(&self, packages: &[String]) -> Option<Vec<String>> {
        let mut argv = self.install_prefix.clone()?;
        argv.extend(packages.iter().cloned());
        Some(argv)
    }

    /// Host regexes for this runtime's package registries, whitelisted when
    /// an install auto-promotes the network to filtered.
    pub fn registry_patterns(&self) -> &[String] {
        &self.registry_patterns
    }
}

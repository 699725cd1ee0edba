//! isol8 - Sandboxed Code Execution Engine
//!
//! This library executes untrusted source code inside short-lived,
//! resource-capped Linux containers and returns stdout, stderr, exit
//! status, and an optional per-request network audit log.
//!
//! # Features
//!
//! - Multi-runtime support (Python, Node, Bun, Deno, Bash)
//! - Warm pools of reusable workers keyed by image, network, and security
//! - Filtered networking: in-container proxy with host-regex policy and
//!   kernel-level egress lockdown
//! - Bounded output streaming, wall-clock timeouts, OOM semantics
//! - Authenticated remote gateway plus a matching HTTP client
//!
//! # Architecture
//!
//! The engine compiles each request into a worker + command + filesystem +
//! network configuration, runs it, and scrubs residual state before the
//! worker is reused. The gateway exposes the engine over HTTP; the client
//! implements the same contract against a remote gateway.

pub mod archive;
pub mod client;
pub mod config;
pub mod constants;
pub mod container;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod images;
pub mod models;
pub mod pool;
pub mod proxy;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use client::RemoteClient;
pub use config::EngineOptions;
pub use engine::{Engine, Executor};
pub use error::{SandboxError, SandboxResult};
pub use models::{ExecutionRequest, ExecutionResult, StreamEvent};

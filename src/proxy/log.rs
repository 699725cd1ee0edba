//! Append-only network audit log

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::SandboxResult;
use crate::models::NetworkLogEntry;

/// Writes one JSON line per policy decision.
///
/// The engine reads the file back at finalization and truncates it, so the
/// logger only ever appends.
pub struct NetworkLogger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl NetworkLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Append one record; creates the file on first use.
    pub async fn append(&self, entry: &NetworkLogEntry) -> SandboxResult<()> {
        let line = serde_json::to_string(entry).context("serialize network log entry")?;

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open network log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("write network log entry")?;
        file.write_all(b"\n").await.context("write newline")?;
        file.flush().await.context("flush network log")?;
        Ok(())
    }
}

/// Parse the JSONL records the engine reads back from a container.
///
/// Malformed lines are skipped: a partially written tail line must not
/// invalidate the rest of the audit log.
pub fn parse_log(contents: &str) -> Vec<NetworkLogEntry> {
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

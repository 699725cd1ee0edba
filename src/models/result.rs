//! Execution result and stream event models

use serde::{Deserialize, Serialize};

use super::network::NetworkLogEntry;

/// The outcome of a single execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Process exit code; 137 signals OOM or SIGKILL on timeout
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall time from command start to exit
    pub duration_ms: u64,
    /// Present iff network mode is filtered and logging was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_logs: Option<Vec<NetworkLogEntry>>,
    /// True when stdout or stderr hit the byte cap
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// One chunk of a streaming execution.
///
/// The concatenation of `Stdout`/`Stderr` data equals the collected result's
/// stdout/stderr (modulo truncation); `Exit` is always the final event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Stdout(String),
    Stderr(String),
    Exit(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_event_wire_shape() {
        let ev = StreamEvent::Stdout("hi".to_string());
        assert_eq!(
            serde_json::to_string(&ev).unwrap(),
            r#"{"type":"stdout","data":"hi"}"#
        );

        let ev = StreamEvent::Exit(137);
        assert_eq!(
            serde_json::to_string(&ev).unwrap(),
            r#"{"type":"exit","data":137}"#
        );
    }

    #[test]
    fn test_result_omits_absent_network_logs() {
        let result = ExecutionResult {
            exit_code: 0,
            stdout: "2\n".to_string(),
            stderr: String::new(),
            duration_ms: 12,
            network_logs: None,
            truncated: false,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("networkLogs"));
        assert!(json.contains(r#""exitCode":0"#));
    }
}

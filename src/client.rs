//! Remote execution client
//!
//! HTTP counterpart of the gateway implementing the same `Executor`
//! contract, so callers switch between a local engine and a remote one
//! without seeing the transport.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use crate::engine::Executor;
use crate::error::{ErrorResponse, SandboxError, SandboxResult};
use crate::gateway::{ExecuteBody, ExecuteResponse, HealthResponse};
use crate::models::{ExecutionRequest, ExecutionResult, StreamEvent};

/// Client for a remote execution gateway
pub struct RemoteClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    /// Gateway liveness and version.
    pub async fn health(&self) -> SandboxResult<HealthResponse> {
        let response = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(transport_error)?;
        response
            .json::<HealthResponse>()
            .await
            .map_err(transport_error)
    }

    async fn post(&self, path: &str, req: &ExecutionRequest) -> SandboxResult<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ExecuteBody {
                request: req.clone(),
            })
            .send()
            .await
            .map_err(transport_error)?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(error_from_response(status, &body))
    }
}

fn transport_error(err: reqwest::Error) -> SandboxError {
    SandboxError::Internal(anyhow::anyhow!("gateway request failed: {err}"))
}

/// Reconstruct the engine error the gateway serialized.
fn error_from_response(status: reqwest::StatusCode, body: &str) -> SandboxError {
    if let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) {
        let message = parsed.error.message;
        return match parsed.error.code.as_str() {
            "BAD_REQUEST" => SandboxError::BadRequest(message),
            "UNKNOWN_RUNTIME" => SandboxError::UnknownRuntime(message),
            "ENGINE_STOPPED" => SandboxError::EngineStopped,
            "POOL_EXHAUSTED" => SandboxError::PoolExhausted,
            "PACKAGE_INSTALL_FAILED" => SandboxError::PackageInstallFailed {
                exit_code: -1,
                stderr: message,
            },
            "UNAUTHORIZED" => SandboxError::Unauthorized,
            "FORBIDDEN" => SandboxError::Forbidden,
            "NOT_FOUND" => SandboxError::NotFound,
            "CONTAINER_RUNTIME_UNAVAILABLE" => SandboxError::ContainerRuntimeUnavailable(message),
            "DOCKER_ERROR" => SandboxError::Docker(message),
            _ => SandboxError::Internal(anyhow::anyhow!("{message}")),
        };
    }

    match status.as_u16() {
        401 => SandboxError::Unauthorized,
        403 => SandboxError::Forbidden,
        404 => SandboxError::NotFound,
        _ => SandboxError::Internal(anyhow::anyhow!("gateway returned {status}: {body}")),
    }
}

#[async_trait]
impl Executor for RemoteClient {
    async fn execute(&self, req: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let response = self.post("/execute", &req).await?;
        let parsed: ExecuteResponse = response.json().await.map_err(transport_error)?;
        Ok(parsed.result)
    }

    async fn execute_stream(
        &self,
        req: ExecutionRequest,
    ) -> SandboxResult<mpsc::Receiver<StreamEvent>> {
        let response = self.post("/execute/stream", &req).await?;
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut body = response.bytes_stream();
            let mut buf: Vec<u8> = Vec::new();

            while let Some(chunk) = body.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Stderr(format!("stream transport error: {e}\n")))
                            .await;
                        let _ = tx.send(StreamEvent::Exit(1)).await;
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                // NDJSON framing: one event per line
                while let Some(newline) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=newline).collect();
                    let Ok(event) = serde_json::from_slice::<StreamEvent>(&line) else {
                        continue;
                    };
                    let is_exit = matches!(event, StreamEvent::Exit(_));
                    if tx.send(event).await.is_err() || is_exit {
                        return;
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_is_normalized() {
        let client = RemoteClient::new("http://localhost:3000/", "key");
        assert_eq!(client.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_error_from_structured_body() {
        let body = r#"{"error":{"code":"UNKNOWN_RUNTIME","message":"Unknown runtime: perl"}}"#;
        let err = error_from_response(reqwest::StatusCode::BAD_REQUEST, body);
        assert!(matches!(err, SandboxError::UnknownRuntime(_)));
    }

    #[test]
    fn test_error_from_bare_status() {
        assert!(matches!(
            error_from_response(reqwest::StatusCode::UNAUTHORIZED, "nope"),
            SandboxError::Unauthorized
        ));
        assert!(matches!(
            error_from_response(reqwest::StatusCode::FORBIDDEN, ""),
            SandboxError::Forbidden
        ));
    }
}

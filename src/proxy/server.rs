//! Filtering HTTP/HTTPS proxy
//!
//! Runs inside every filtered container on a loopback port. Plain HTTP
//! requests are forwarded (or refused) per the host policy; HTTPS arrives
//! as CONNECT and is spliced as an opaque tunnel after the decision. The
//! kernel-level egress lockdown guarantees this proxy is the only way out.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::io::{AsyncReadExt, AsyncWriteExt, copy_bidirectional};
use tokio::net::{TcpListener, TcpStream};

use crate::error::SandboxResult;
use crate::models::{NetworkLogEntry, PolicyAction};

use super::log::NetworkLogger;
use super::policy::FilterPolicy;

/// Upper bound on a request or response head
const MAX_HEAD_BYTES: usize = 32 * 1024;

/// A parsed request head
#[derive(Debug)]
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

/// The in-container filtering proxy
pub struct ProxyServer {
    policy: FilterPolicy,
    logger: Arc<NetworkLogger>,
    port: u16,
}

impl ProxyServer {
    pub fn new(policy: FilterPolicy, logger: Arc<NetworkLogger>, port: u16) -> Self {
        Self {
            policy,
            logger,
            port,
        }
    }

    /// Accept loop; runs until the task is aborted or the listener fails.
    pub async fn run(self) -> SandboxResult<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .with_context(|| format!("bind proxy port {}", self.port))?;
        tracing::info!(port = self.port, "Filtering proxy listening");

        let server = Arc::new(self);
        loop {
            let (stream, peer) = listener.accept().await.context("accept proxy client")?;
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                if let Err(e) = server.handle(stream).await {
                    tracing::debug!(peer = %peer, error = %e, "Proxy connection ended with error");
                }
            });
        }
    }

    async fn handle(&self, mut client: TcpStream) -> anyhow::Result<()> {
        let (head_raw, leftover) = read_head(&mut client).await?;
        let head = parse_head(&head_raw).context("malformed request head")?;

        if head.method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(client, &head).await
        } else {
            self.handle_http(client, &head, leftover).await
        }
    }

    /// HTTPS tunnel: decide on the request-line target before any upstream
    /// socket is opened, then splice bytes both ways.
    async fn handle_connect(&self, mut client: TcpStream, head: &RequestHead) -> anyhow::Result<()> {
        let (host, port) = split_host_port(&head.target, 443);
        let started = Instant::now();
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let action = self.policy.decide(&host);

        if action == PolicyAction::Block {
            client
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .ok();
            self.log(timestamp_ms, &host, "CONNECT", None, None, action, started)
                .await;
            return Ok(());
        }

        let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => {
                client
                    .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                    .await
                    .ok();
                self.log(timestamp_ms, &host, "CONNECT", None, None, action, started)
                    .await;
                return Err(e).context("connect upstream");
            }
        };

        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        let _ = copy_bidirectional(&mut client, &mut upstream).await;

        self.log(timestamp_ms, &host, "CONNECT", None, None, action, started)
            .await;
        Ok(())
    }

    /// Plain HTTP: forward the rewritten request, capture the upstream
    /// status line, then stream the rest of both directions.
    async fn handle_http(
        &self,
        mut client: TcpStream,
        head: &RequestHead,
        leftover: Vec<u8>,
    ) -> anyhow::Result<()> {
        let started = Instant::now();
        let timestamp_ms = chrono::Utc::now().timestamp_millis();

        let Some((host, port, path)) = resolve_target(head) else {
            client
                .write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n")
                .await
                .ok();
            anyhow::bail!("request without resolvable host");
        };

        let action = self.policy.decide(&host);
        if action == PolicyAction::Block {
            client
                .write_all(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n")
                .await
                .ok();
            self.log(
                timestamp_ms,
                &host,
                &head.method,
                Some(path),
                None,
                action,
                started,
            )
            .await;
            return Ok(());
        }

        let mut upstream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => {
                client
                    .write_all(b"HTTP/1.1 502 Bad Gateway\r\n\r\n")
                    .await
                    .ok();
                self.log(
                    timestamp_ms,
                    &host,
                    &head.method,
                    Some(path),
                    None,
                    action,
                    started,
                )
                .await;
                return Err(e).context("connect upstream");
            }
        };

        upstream
            .write_all(rewrite_head(head, &path).as_bytes())
            .await?;
        upstream.write_all(&leftover).await?;

        let (response_head, response_leftover) = read_head(&mut upstream).await?;
        let status_code = parse_status_code(&response_head);

        client.write_all(response_head.as_bytes()).await?;
        client.write_all(&response_leftover).await?;
        let _ = copy_bidirectional(&mut client, &mut upstream).await;

        self.log(
            timestamp_ms,
            &host,
            &head.method,
            Some(path),
            status_code,
            action,
            started,
        )
        .await;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        timestamp_ms: i64,
        host: &str,
        method: &str,
        path: Option<String>,
        status_code: Option<u16>,
        action: PolicyAction,
        started: Instant,
    ) {
        let entry = NetworkLogEntry {
            timestamp_ms,
            host: host.to_string(),
            method: method.to_string(),
            path,
            status_code,
            action,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        if let Err(e) = self.logger.append(&entry).await {
            tracing::warn!(error = %e, "Failed to append network log entry");
        }
    }
}

/// Read from the stream until the end of an HTTP head.
///
/// Returns the head (including the terminating blank line) and any bytes
/// already read past it.
async fn read_head(stream: &mut TcpStream) -> anyhow::Result<(String, Vec<u8>)> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(end) = find_head_end(&buf) {
            let leftover = buf.split_off(end);
            let head = String::from_utf8(buf).context("head is not UTF-8")?;
            return Ok((head, leftover));
        }
        if buf.len() > MAX_HEAD_BYTES {
            anyhow::bail!("request head exceeds {MAX_HEAD_BYTES} bytes");
        }
        let n = stream.read(&mut chunk).await.context("read head")?;
        if n == 0 {
            anyhow::bail!("connection closed before end of head");
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn parse_head(raw: &str) -> Option<RequestHead> {
    let mut lines = raw.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }
    }
    Some(RequestHead {
        method,
        target,
        headers,
    })
}

/// Split `host[:port]` with a scheme-appropriate default.
fn split_host_port(target: &str, default_port: u16) -> (String, u16) {
    match target.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (target.to_string(), default_port),
        },
        None => (target.to_string(), default_port),
    }
}

/// Resolve (host, port, origin-form path) from an absolute-form target or
/// the Host header.
fn resolve_target(head: &RequestHead) -> Option<(String, u16, String)> {
    if let Some(rest) = head.target.strip_prefix("http://") {
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], rest[i..].to_string()),
            None => (rest, "/".to_string()),
        };
        let (host, port) = split_host_port(authority, 80);
        return Some((host, port, path));
    }

    let host_header = head
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("host"))
        .map(|(_, value)| value.as_str())?;
    let (host, port) = split_host_port(host_header, 80);
    let path = if head.target.starts_with('/') {
        head.target.clone()
    } else {
        "/".to_string()
    };
    Some((host, port, path))
}

/// Rebuild the head in origin-form with hop-by-hop headers stripped and the
/// connection pinned to close, so one connection carries one request.
fn rewrite_head(head: &RequestHead, path: &str) -> String {
    let mut out = format!("{} {} HTTP/1.1\r\n", head.method, path);
    for (name, value) in &head.headers {
        if name.eq_ignore_ascii_case("proxy-connection") || name.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        out.push_str(name);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("Connection: close\r\n\r\n");
    out
}

fn parse_status_code(response_head: &str) -> Option<u16> {
    response_head
        .split("\r\n")
        .next()?
        .split_whitespace()
        .nth(1)?
        .parse()
        .ok()
}

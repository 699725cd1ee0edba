//! Base image builder
//!
//! Every runtime executes in a purpose-built `isol8:<runtime>` image: the
//! upstream language image plus the sandbox/proxy users, the tools the
//! cleanup protocol and egress lockdown need, and the container init script.
//! The filtering proxy binary is copied in when a path to it is provided.

use std::io::Cursor;
use std::path::PathBuf;

use anyhow::Context;
use bollard::body_full;
use bollard::query_parameters::BuildImageOptionsBuilder;
use futures::StreamExt;

use crate::constants::{PROXY_UID, SANDBOX_UID, runtimes};
use crate::container::ContainerManager;
use crate::error::{SandboxError, SandboxResult};
use crate::runtime::RuntimeAdapter;

/// Container init: applies the egress lockdown for filtered networking,
/// then parks as the long-lived container process.
const INIT_SCRIPT: &str = r#"#!/bin/sh
set -e

if [ "$ISOL8_NETWORK" = "filtered" ]; then
    iptables -A OUTPUT -o lo -p tcp --dport "${ISOL8_PROXY_PORT:-8877}" -m owner --uid-owner 1000 -j ACCEPT
    iptables -A OUTPUT -m owner --uid-owner 1000 -j DROP
fi

exec sleep infinity
"#;

/// Upstream base image for a runtime tag.
fn base_image(runtime: &str) -> SandboxResult<&'static str> {
    match runtime {
        runtimes::PYTHON => Ok("python:3.12-slim-bookworm"),
        runtimes::NODE => Ok("node:22-bookworm-slim"),
        runtimes::BUN => Ok("oven/bun:1.2-slim"),
        runtimes::DENO => Ok("denoland/deno:debian"),
        runtimes::BASH => Ok("debian:bookworm-slim"),
        _ => Err(SandboxError::UnknownRuntime(runtime.to_string())),
    }
}

/// Render the Dockerfile for a runtime.
///
/// Some upstream images ship a default user on uid 1000; it is removed so
/// the sandbox user can claim that uid, which the egress lockdown and the
/// tmpfs ownership rely on.
fn dockerfile(runtime: &str, with_proxy: bool) -> SandboxResult<String> {
    let base = base_image(runtime)?;
    let proxy_copy = if with_proxy {
        "COPY isol8-proxy /usr/local/bin/isol8-proxy\nRUN chmod 755 /usr/local/bin/isol8-proxy\n"
    } else {
        ""
    };

    Ok(format!(
        r#"FROM {base}

RUN apt-get update \
 && apt-get install -y --no-install-recommends iptables procps bash ca-certificates \
 && rm -rf /var/lib/apt/lists/* \
 && for u in node bun deno; do userdel -r "$u" 2>/dev/null || true; done \
 && groupadd -g {SANDBOX_UID} sandbox \
 && useradd -u {SANDBOX_UID} -g {SANDBOX_UID} -d /sandbox -M -s /bin/bash sandbox \
 && groupadd -g {PROXY_UID} proxy \
 && useradd -u {PROXY_UID} -g {PROXY_UID} -M -s /usr/sbin/nologin proxy \
 && mkdir -p /sandbox /var/log/isol8 \
 && chown sandbox:sandbox /sandbox \
 && chown proxy:proxy /var/log/isol8

COPY sandbox-init.sh /usr/local/bin/sandbox-init.sh
RUN chmod 755 /usr/local/bin/sandbox-init.sh
{proxy_copy}
ENV HOME=/sandbox
WORKDIR /sandbox
ENTRYPOINT ["/usr/local/bin/sandbox-init.sh"]
"#
    ))
}

/// Builds and validates the `isol8:<runtime>` images
pub struct ImageBuilder {
    manager: ContainerManager,
    proxy_binary: Option<PathBuf>,
}

impl ImageBuilder {
    pub fn new(manager: ContainerManager) -> Self {
        Self {
            manager,
            proxy_binary: None,
        }
    }

    /// Include a compiled `isol8-proxy` in the images, enabling filtered
    /// networking.
    pub fn with_proxy_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.proxy_binary = Some(path.into());
        self
    }

    /// Build the image for one runtime.
    pub async fn build(&self, runtime: &str) -> SandboxResult<()> {
        let adapter = RuntimeAdapter::get(runtime)?;
        let context = self.build_context(runtime).await?;

        let options = BuildImageOptionsBuilder::default()
            .t(adapter.image())
            .rm(true)
            .build();

        tracing::info!(image = %adapter.image(), runtime, "Building base image");

        let mut stream =
            self.manager
                .docker()
                .build_image(options, None, Some(body_full(context.into())));
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(error) = info.error {
                return Err(SandboxError::Docker(format!(
                    "image build failed: {error}"
                )));
            }
            if let Some(line) = info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    tracing::debug!(image = %adapter.image(), "{line}");
                }
            }
        }

        tracing::info!(image = %adapter.image(), "Image built");
        Ok(())
    }

    /// Build every runtime's image.
    pub async fn build_all(&self) -> SandboxResult<()> {
        for runtime in runtimes::ALL {
            self.build(runtime).await?;
        }
        Ok(())
    }

    /// Whether the image for a runtime exists locally.
    pub async fn verify(&self, runtime: &str) -> SandboxResult<bool> {
        let adapter = RuntimeAdapter::get(runtime)?;
        match self.manager.docker().inspect_image(adapter.image()).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Runtimes whose image is missing locally.
    pub async fn missing(&self) -> SandboxResult<Vec<&'static str>> {
        let mut missing = Vec::new();
        for runtime in runtimes::ALL {
            if !self.verify(runtime).await? {
                missing.push(*runtime);
            }
        }
        Ok(missing)
    }

    /// Assemble the tar build context: Dockerfile, init script, and the
    /// proxy binary when configured.
    async fn build_context(&self, runtime: &str) -> SandboxResult<Vec<u8>> {
        let with_proxy = self.proxy_binary.is_some();
        let dockerfile = dockerfile(runtime, with_proxy)?;

        let mut builder = tar::Builder::new(Vec::new());

        append_entry(&mut builder, "Dockerfile", dockerfile.as_bytes(), 0o644)?;
        append_entry(&mut builder, "sandbox-init.sh", INIT_SCRIPT.as_bytes(), 0o755)?;

        if let Some(path) = &self.proxy_binary {
            let binary = tokio::fs::read(path)
                .await
                .with_context(|| format!("read proxy binary {}", path.display()))?;
            append_entry(&mut builder, "isol8-proxy", &binary, 0o755)?;
        }

        let context = builder.into_inner().context("finalize build context")?;
        Ok(context)
    }
}

fn append_entry(
    builder: &mut tar::Builder<Vec<u8>>,
    name: &str,
    contents: &[u8],
    mode: u32,
) -> SandboxResult<()> {
    let mut header = tar::Header::new_ustar();
    header
        .set_path(name)
        .with_context(|| format!("tar entry {name}"))?;
    header.set_size(contents.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder
        .append(&header, Cursor::new(contents))
        .with_context(|| format!("append {name}"))?;
    Ok(())
}

/// Remove every container the engine has created on this host.
///
/// The contract behind the external `cleanup` command: containers are
/// labeled at create time and enumerated here.
pub async fn cleanup_containers(manager: &ContainerManager) -> SandboxResult<usize> {
    manager.remove_labeled().await
}

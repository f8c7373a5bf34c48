//! Host address discovery and the boot-time HTTP file server.
//!
//! The installer fetches its answer files from `http://<HostIP>:<HTTPPort>/`.
//! The host address is taken from the physical NIC the VNIC hangs off, so
//! the guest can always route to it.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use anyhow::Context;
use async_trait::async_trait;
use axum::Router;
use nix::ifaddrs::getifaddrs;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};

// ---------------------------------------------------------------------------
// Host IP
// ---------------------------------------------------------------------------

/// First IPv4 address configured on `nic`.
pub fn first_ipv4(nic: &str) -> anyhow::Result<Option<Ipv4Addr>> {
    let addrs = getifaddrs().context("listing interface addresses")?;
    Ok(addrs
        .filter(|ifa| ifa.interface_name == nic)
        .filter_map(|ifa| ifa.address)
        .find_map(|addr| addr.as_sockaddr_in().map(|sin| *SocketAddrV4::from(*sin).ip())))
}

pub struct HostIpDiscover;

#[async_trait]
impl Step for HostIpDiscover {
    fn name(&self) -> &'static str {
        "host-ip-discover"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let nic = ctx.config.network.host_nic.clone();
        match first_ipv4(&nic) {
            Ok(Some(ip)) => {
                info!(%nic, %ip, "discovered host IP address");
                ctx.http_ip = Some(ip.to_string());
                ctx.put_generated("HostIP", ip.to_string());
                StepAction::Continue
            }
            Ok(None) => ctx.fail(anyhow::anyhow!(
                "cannot find any IPv4 address on host interface {nic}"
            )),
            Err(e) => ctx.fail(e.context(format!("reading addresses of {nic}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// File server
// ---------------------------------------------------------------------------

/// Serves `http.directory` on the first free port in the configured range.
#[derive(Default)]
pub struct HttpServer {
    shutdown: Option<CancellationToken>,
    task: Option<JoinHandle<std::io::Result<()>>>,
}

impl HttpServer {
    pub fn new() -> Self {
        Self::default()
    }
}

async fn bind_in_range(min: u16, max: u16) -> anyhow::Result<TcpListener> {
    for port in min..=max {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }
    anyhow::bail!("no free HTTP port between {min} and {max}")
}

fn router(dir: PathBuf) -> Router {
    Router::new().fallback_service(ServeDir::new(dir))
}

#[async_trait]
impl Step for HttpServer {
    fn name(&self) -> &'static str {
        "http-server"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let Some(dir) = ctx.config.http.directory.clone() else {
            debug!("no http.directory configured, not serving files");
            return StepAction::Continue;
        };

        let listener = match bind_in_range(ctx.config.http.port_min, ctx.config.http.port_max).await {
            Ok(l) => l,
            Err(e) => return ctx.fail(e),
        };
        let port = match listener.local_addr() {
            Ok(addr) => addr.port(),
            Err(e) => return ctx.fail(e),
        };

        let token = CancellationToken::new();
        let shutdown = token.clone();
        info!(dir = %dir.display(), port, "starting HTTP server");
        self.task = Some(tokio::spawn(async move {
            axum::serve(listener, router(dir))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        }));
        self.shutdown = Some(token);

        ctx.http_port = Some(port);
        ctx.put_generated("HTTPPort", port);
        StepAction::Continue
    }

    async fn cleanup(&mut self, _ctx: &mut BuildContext) -> anyhow::Result<()> {
        if let Some(token) = self.shutdown.take() {
            token.cancel();
        }
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(Ok(())) => debug!("HTTP server stopped"),
                Ok(Err(e)) => warn!(error = %e, "HTTP server exited with error"),
                Err(e) => warn!(error = %e, "HTTP server task failed"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_has_no_address() {
        assert_eq!(first_ipv4("definitely-not-a-nic0").unwrap(), None);
    }

    #[tokio::test]
    async fn serves_files_from_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ks.cfg"), "install\n").unwrap();

        let listener = bind_in_range(18000, 18999).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let token = CancellationToken::new();
        let shutdown = token.clone();
        let dir = tmp.path().to_path_buf();
        let task = tokio::spawn(async move {
            axum::serve(listener, router(dir))
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let body = client
            .get(format!("http://127.0.0.1:{port}/ks.cfg"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "install\n");

        let missing = client
            .get(format!("http://127.0.0.1:{port}/nope"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        drop(client);

        token.cancel();
        task.await.unwrap().unwrap();
    }
}

//! Remote shell into the guest over the system `ssh` client.
//!
//! All I/O goes through `tokio::process::Command` so the build stays async.
//! Reachability is checked in two stages: a TCP handshake on the guest's
//! ssh port, then an `ssh ... true` round trip to confirm authentication.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command;
use crate::error::BuildError;

/// Options shared by every ssh invocation.
///
/// Build VMs are fresh on every run, so host keys are never recorded and a
/// password prompt fails immediately instead of hanging.
const SSH_OPTS: &[&str] = &[
    "-o", "StrictHostKeyChecking=no",
    "-o", "UserKnownHostsFile=/dev/null",
    "-o", "LogLevel=ERROR",
    "-o", "BatchMode=yes",
    "-o", "ConnectTimeout=5",
];

const PROBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct RemoteShell {
    pub ssh: PathBuf,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub private_key_file: Option<PathBuf>,
}

impl RemoteShell {
    fn args(&self, command: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
        if let Some(key) = &self.private_key_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args.extend([
            "-p".to_string(),
            self.port.to_string(),
            format!("{}@{}", self.username, self.host),
            command.to_string(),
        ]);
        args
    }

    /// Run `command` in the guest and return its stdout.
    pub async fn run(&self, command: &str) -> Result<String, BuildError> {
        debug!(host = %self.host, command, "remote exec");
        command::run(&self.ssh, self.args(command)).await
    }

    async fn port_open(&self) -> bool {
        let addr = format!("{}:{}", self.host, self.port);
        matches!(
            tokio::time::timeout(PROBE_CONNECT_TIMEOUT, TcpStream::connect(&addr)).await,
            Ok(Ok(_))
        )
    }

    /// Poll until the guest accepts ssh logins, `timeout` passes or
    /// `cancel` fires.
    pub async fn wait_until_ready(
        &self,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), BuildError> {
        info!(host = %self.host, port = self.port, "waiting for ssh to become available");

        let poll = async {
            loop {
                if self.port_open().await {
                    match self.run("true").await {
                        Ok(_) => return,
                        Err(e) => debug!(error = %e, "ssh probe failed"),
                    }
                }
                tokio::time::sleep(interval).await;
            }
        };

        tokio::select! {
            _ = poll => {
                info!(host = %self.host, "connected to ssh");
                Ok(())
            }
            _ = tokio::time::sleep(timeout) => Err(BuildError::Timeout {
                what: format!("ssh on {}:{}", self.host, self.port),
                after: timeout,
            }),
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn shell() -> RemoteShell {
        RemoteShell {
            ssh: PathBuf::from("ssh"),
            host: "192.168.1.57".to_string(),
            port: 22,
            username: "root".to_string(),
            private_key_file: None,
        }
    }

    #[test]
    fn command_is_the_last_argument() {
        let args = shell().args("uname -a");
        assert_eq!(args.last().map(String::as_str), Some("uname -a"));
        assert_eq!(args[args.len() - 2], "root@192.168.1.57");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.contains(&"-i".to_string()));
    }

    #[test]
    fn private_key_is_passed_when_configured() {
        let mut sh = shell();
        sh.private_key_file = Some(PathBuf::from("/keys/id_ed25519"));
        let args = sh.args("true");
        let i = args.iter().position(|a| a == "-i").expect("-i present");
        assert_eq!(args[i + 1], "/keys/id_ed25519");
    }

    #[tokio::test]
    async fn unreachable_guest_times_out() {
        let mut sh = shell();
        sh.host = "127.0.0.1".to_string();
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        sh.port = port;

        let err = sh
            .wait_until_ready(
                Duration::from_millis(200),
                Duration::from_millis(20),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Timeout { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn cancellation_stops_the_wait() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = shell()
            .wait_until_ready(Duration::from_secs(60), Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
    }
}

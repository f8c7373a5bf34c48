//! bhyve process supervision.
//!
//! ## Architecture
//!
//! ```text
//! BhyveDriver::start(LaunchSpec)
//!     └─► tokio::process::Command  →  bhyve child (install media attached)
//!             └─► supervisor task
//!                     ├─► exit 0 in cycle 1  → relaunch with reboot args
//!                     ├─► any other exit     → publish rc on the completion watch
//!                     └─► kill request       → start_kill, reply to stop()
//! ```
//!
//! The supervisor owns the child. Callers only ever talk to it through
//! [`Driver::stop`] and [`Driver::wait_for_shutdown`]. The lifecycle state
//! machine, the kill channel and the completion receiver sit behind one
//! mutex, which the supervisor holds while swapping in the relaunched process.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use statig::prelude::*;
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Driver, LaunchSpec, ShutdownWait, args};
use crate::error::BuildError;
use crate::state_machine::driver_sm::{DriverEvent, DriverMachine, EXIT_ABNORMAL, State};

type KillReply = oneshot::Sender<io::Result<()>>;

#[derive(Default)]
struct Inner {
    /// `None` until `start` succeeds.
    machine: Option<StateMachine<DriverMachine>>,
    /// Present while the supervisor is alive.
    kill_tx: Option<mpsc::Sender<KillReply>>,
    /// Completion signal; holds `Some(rc)` once the lifecycle finished.
    done_rx: Option<watch::Receiver<Option<i32>>>,
}

pub struct BhyveDriver {
    program: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl BhyveDriver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> State {
        match &self.inner.lock().await.machine {
            Some(machine) => machine.state().clone(),
            None => State::NotStarted {},
        }
    }

    /// Number of hypervisor processes launched so far.
    pub async fn launches(&self) -> u32 {
        match &self.inner.lock().await.machine {
            Some(machine) => machine.inner().launches,
            None => 0,
        }
    }
}

#[async_trait]
impl Driver for BhyveDriver {
    async fn start(&self, spec: LaunchSpec) -> Result<(), BuildError> {
        let mut inner = self.inner.lock().await;
        if inner.machine.is_some() {
            return Err(BuildError::other(format!(
                "VM {} has already been started",
                spec.vm_name
            )));
        }

        let boot_args = args::boot_args(&spec);
        let reboot_args = args::reboot_args(&spec);
        info!(target: "driver", vm = %spec.vm_name, "starting bhyve VM");
        debug!(target: "driver", ?boot_args, ?reboot_args);

        let child = spawn(&self.program, &boot_args)?;

        let mut machine = DriverMachine::new(&spec.vm_name).state_machine();
        machine.handle(&DriverEvent::Launched);

        let (kill_tx, kill_rx) = mpsc::channel(4);
        let (done_tx, done_rx) = watch::channel(None);
        inner.machine = Some(machine);
        inner.kill_tx = Some(kill_tx);
        inner.done_rx = Some(done_rx);
        drop(inner);

        tokio::spawn(supervise(
            self.program.clone(),
            reboot_args,
            child,
            self.inner.clone(),
            kill_rx,
            done_tx,
        ));

        Ok(())
    }

    async fn stop(&self) -> Result<(), BuildError> {
        let kill_tx = self.inner.lock().await.kill_tx.clone();
        let Some(kill_tx) = kill_tx else {
            return Ok(());
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if kill_tx.send(reply_tx).await.is_err() {
            return Ok(());
        }

        match reply_rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(BuildError::Io(e)),
            // Supervisor finished before it got to the request.
            Err(_) => Ok(()),
        }
    }

    async fn wait_for_shutdown(&self, cancel: &CancellationToken) -> ShutdownWait {
        let done_rx = self.inner.lock().await.done_rx.clone();
        let Some(mut done_rx) = done_rx else {
            return ShutdownWait::AlreadyStopped;
        };

        tokio::select! {
            biased;
            res = done_rx.wait_for(Option::is_some) => match res {
                Ok(rc) => ShutdownWait::Exited((*rc).unwrap_or(EXIT_ABNORMAL)),
                Err(_) => ShutdownWait::AlreadyStopped,
            },
            _ = cancel.cancelled() => ShutdownWait::Cancelled,
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor
// ---------------------------------------------------------------------------

fn spawn(program: &Path, args: &[String]) -> Result<Child, BuildError> {
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| BuildError::CommandSpawn {
            program: program.display().to_string(),
            source,
        })
}

fn exit_code(status: io::Result<ExitStatus>) -> i32 {
    match status {
        Ok(status) => status.code().unwrap_or(EXIT_ABNORMAL),
        Err(e) => {
            warn!(target: "driver", error = %e, "waiting for bhyve failed");
            EXIT_ABNORMAL
        }
    }
}

async fn supervise(
    program: PathBuf,
    reboot_args: Vec<String>,
    mut child: Child,
    inner: Arc<Mutex<Inner>>,
    mut kill_rx: mpsc::Receiver<KillReply>,
    done_tx: watch::Sender<Option<i32>>,
) {
    loop {
        let code = tokio::select! {
            status = child.wait() => exit_code(status),
            Some(reply) = kill_rx.recv() => {
                let result = child.start_kill();
                if let Some(machine) = inner.lock().await.machine.as_mut() {
                    machine.handle(&DriverEvent::StopRequested);
                }
                let _ = reply.send(result);
                continue;
            }
        };

        let mut guard = inner.lock().await;
        let rc = {
            let Some(machine) = guard.machine.as_mut() else {
                return;
            };
            machine.handle(&DriverEvent::Exited(code));

            if matches!(machine.state(), State::Restarting {}) {
                info!(target: "driver", vm = %machine.inner().vm_name, "restarting bhyve VM after reboot");
                match spawn(&program, &reboot_args) {
                    Ok(next) => {
                        machine.handle(&DriverEvent::Launched);
                        child = next;
                    }
                    Err(e) => machine.handle(&DriverEvent::RelaunchFailed(e.to_string())),
                }
            }
            machine.state().exit_code()
        };

        if let Some(rc) = rc {
            guard.kill_tx = None;
            let _ = done_tx.send(Some(rc));
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

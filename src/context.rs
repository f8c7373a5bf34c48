//! Strongly typed build state threaded through every pipeline step.
//!
//! Each optional field has exactly one producing step. Consumers use the
//! `require_*` accessors, which turn a missing producer into a recorded
//! error instead of a panic.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::config::BuildConfig;
use crate::error::BuildError;
use crate::pipeline::StepAction;
use crate::vm::remote_shell::RemoteShell;
use crate::vm::{Driver, VncEndpoint};

/// Terminal classification of a finished build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Success,
    Error,
    Cancelled,
    Halted,
}

pub struct BuildContext {
    pub config: Arc<BuildConfig>,
    pub driver: Arc<dyn Driver>,
    pub cancel: CancellationToken,

    // Terminal markers, written by steps (error) and the pipeline (flags).
    pub error: Option<BuildError>,
    pub halted: bool,
    pub cancelled: bool,

    /// download → start-vm
    pub iso_path: Option<PathBuf>,
    /// host-ip-discover → http-server, type-boot-command
    pub http_ip: Option<String>,
    /// http-server → type-boot-command
    pub http_port: Option<u16>,
    /// create-disk | create-zvol → start-vm. Always the path handed to the
    /// hypervisor.
    pub disk_path: Option<PathBuf>,
    /// configure-vnc → start-vm, type-boot-command
    pub vnc: Option<VncEndpoint>,
    /// wait-guest-address → connect
    pub guest_address: Option<String>,
    /// connect → provision, shutdown
    pub remote: Option<RemoteShell>,
    /// shutdown
    pub exit_code: Option<i32>,

    /// Facts exposed on the artifact.
    pub generated_data: Map<String, Value>,
}

impl BuildContext {
    pub fn new(
        config: Arc<BuildConfig>,
        driver: Arc<dyn Driver>,
        cancel: CancellationToken,
    ) -> Self {
        let mut generated_data = Map::new();
        generated_data.insert(
            "BuildStarted".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Self {
            config,
            driver,
            cancel,
            error: None,
            halted: false,
            cancelled: false,
            iso_path: None,
            http_ip: None,
            http_port: None,
            disk_path: None,
            vnc: None,
            guest_address: None,
            remote: None,
            exit_code: None,
            generated_data,
        }
    }

    /// Record `err` (first one wins) and ask the pipeline to halt.
    pub fn fail(&mut self, err: impl Into<BuildError>) -> StepAction {
        let err = err.into();
        error!("{err}");
        if self.error.is_none() {
            self.error = Some(err);
        }
        StepAction::Halt
    }

    pub fn put_generated(&mut self, key: &str, value: impl Into<Value>) {
        self.generated_data.insert(key.to_string(), value.into());
    }

    /// Most specific terminal classification available.
    pub fn termination(&self) -> Termination {
        if self.error.as_ref().is_some_and(|e| !e.is_cancellation()) {
            Termination::Error
        } else if self.cancelled || self.error.is_some() {
            Termination::Cancelled
        } else if self.halted {
            Termination::Halted
        } else {
            Termination::Success
        }
    }

    pub fn succeeded(&self) -> bool {
        self.termination() == Termination::Success
    }

    /// Consume the terminal markers into a single result.
    pub fn take_result(&mut self) -> Result<(), BuildError> {
        match self.termination() {
            Termination::Success => Ok(()),
            Termination::Error => Err(self.error.take().unwrap_or(BuildError::Halted)),
            Termination::Cancelled => Err(BuildError::Cancelled),
            Termination::Halted => Err(BuildError::Halted),
        }
    }

    // ------------------------------------------------------------------
    // Required inputs
    // ------------------------------------------------------------------

    pub fn require_iso_path(&self) -> Result<&Path, BuildError> {
        self.iso_path
            .as_deref()
            .ok_or_else(|| missing("install media path"))
    }

    pub fn require_disk_path(&self) -> Result<&Path, BuildError> {
        self.disk_path.as_deref().ok_or_else(|| missing("disk path"))
    }

    pub fn require_vnc(&self) -> Result<&VncEndpoint, BuildError> {
        self.vnc.as_ref().ok_or_else(|| missing("VNC endpoint"))
    }

    pub fn require_guest_address(&self) -> Result<&str, BuildError> {
        self.guest_address
            .as_deref()
            .ok_or_else(|| missing("guest address"))
    }

    pub fn require_remote(&self) -> Result<&RemoteShell, BuildError> {
        self.remote.as_ref().ok_or_else(|| missing("remote shell"))
    }
}

fn missing(what: &str) -> BuildError {
    BuildError::other(format!("{what} was not recorded by an earlier step"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! VM management: hypervisor supervision, guest discovery and guest I/O.
//!
//! The [`Driver`] trait is the seam between the pipeline and the hypervisor
//! process. [`driver::BhyveDriver`] is the real implementation; tests plug in
//! their own.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::BuildError;

pub mod args;
pub mod boot_command;
pub mod driver;
pub mod guest_address;
pub mod remote_shell;
pub mod vnc;

// ---------------------------------------------------------------------------
// Shared types used across submodules
// ---------------------------------------------------------------------------

/// Framebuffer endpoint the hypervisor exposes over RFB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VncEndpoint {
    pub bind_address: String,
    pub port: u16,
    pub password: Option<String>,
}

/// Everything needed to build the hypervisor command line.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub vm_name: String,
    /// Topology string for `-c`, see [`crate::config::CpuConfig::cmdline`].
    pub cpus: String,
    pub memory_mb: u32,
    pub bootrom: PathBuf,
    pub disk_path: PathBuf,
    /// Install media, attached only for the first boot.
    pub iso_path: PathBuf,
    pub vnic: String,
    pub vnc: VncEndpoint,
}

/// Result of waiting for the VM to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownWait {
    /// No process was ever started.
    AlreadyStopped,
    /// The final hypervisor process exited with this (normalized) code.
    Exited(i32),
    /// The cancellation token fired first.
    Cancelled,
}

#[async_trait]
pub trait Driver: Send + Sync {
    /// Launch the first boot cycle and start supervising it.
    async fn start(&self, spec: LaunchSpec) -> Result<(), BuildError>;

    /// Kill the currently tracked process, if any. Idempotent.
    async fn stop(&self) -> Result<(), BuildError>;

    /// Block until the lifecycle finishes or `cancel` fires.
    async fn wait_for_shutdown(&self, cancel: &CancellationToken) -> ShutdownWait;
}

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::command;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};
use crate::vm::{LaunchSpec, ShutdownWait, args};

/// How long cleanup waits for a killed hypervisor to be reaped.
const REAP_TIMEOUT: Duration = Duration::from_secs(30);

fn launch_spec(ctx: &BuildContext) -> Result<LaunchSpec, BuildError> {
    let config = &ctx.config;
    Ok(LaunchSpec {
        vm_name: config.vm_name.clone(),
        cpus: config.cpu.cmdline(),
        memory_mb: config.memory_mb,
        bootrom: config.bootrom.clone(),
        disk_path: ctx.require_disk_path()?.to_path_buf(),
        iso_path: ctx.require_iso_path()?.to_path_buf(),
        vnic: config.network.vnic_name.clone(),
        vnc: ctx.require_vnc()?.clone(),
    })
}

/// Launches the VM through the context's driver.
///
/// Cleanup kills whatever is still running and destroys the kernel VM
/// instance, which outlives the process.
#[derive(Default)]
pub struct StartVm {
    started: bool,
}

impl StartVm {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Step for StartVm {
    fn name(&self) -> &'static str {
        "start-vm"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let spec = match launch_spec(ctx) {
            Ok(spec) => spec,
            Err(e) => return ctx.fail(e),
        };
        if let Some(vnc) = &ctx.vnc {
            info!(
                "the VM is reachable over VNC at vnc://{}:{}",
                vnc.bind_address, vnc.port
            );
        }

        if let Err(e) = ctx.driver.start(spec).await {
            return ctx.fail(e);
        }
        self.started = true;
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        if !std::mem::take(&mut self.started) {
            return Ok(());
        }

        if let Err(e) = ctx.driver.stop().await {
            warn!(error = %e, "stopping bhyve failed");
        }
        let reaped = tokio::time::timeout(
            REAP_TIMEOUT,
            ctx.driver.wait_for_shutdown(&CancellationToken::new()),
        )
        .await;
        match reaped {
            Ok(ShutdownWait::Exited(rc)) => info!(rc, "bhyve exited"),
            Ok(_) => {}
            Err(_) => warn!("bhyve did not exit within {REAP_TIMEOUT:?}"),
        }

        let vm_name = &ctx.config.vm_name;
        info!(vm = %vm_name, "destroying VM");
        // The instance is already gone after a clean poweroff.
        if let Err(e) = command::run(&ctx.config.tools.bhyvectl, args::destroy_args(vm_name)).await {
            warn!(vm = %vm_name, error = %e, "bhyvectl --destroy failed");
        }
        Ok(())
    }
}

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};
use crate::vm::ShutdownWait;

/// Graceful shutdown through `shutdown.command`, or a hard stop when none
/// is configured.
async fn shut_down(ctx: &BuildContext) -> Result<Option<i32>, BuildError> {
    let Some(command) = ctx.config.shutdown.command.as_deref() else {
        info!("no shutdown command configured, stopping the VM");
        ctx.driver.stop().await?;
        return Ok(None);
    };

    info!(command, "gracefully halting the VM");
    // The connection usually drops as the guest goes down.
    if let Err(e) = ctx.require_remote()?.run(command).await {
        warn!(error = %e, "shutdown command returned an error");
    }

    let timeout = Duration::from_secs(ctx.config.shutdown.timeout_secs);
    info!("waiting up to {timeout:?} for the VM to shut down");
    match tokio::time::timeout(timeout, ctx.driver.wait_for_shutdown(&ctx.cancel)).await {
        Err(_) => Err(BuildError::Timeout {
            what: "VM shutdown".to_string(),
            after: timeout,
        }),
        Ok(ShutdownWait::Cancelled) => Err(BuildError::Cancelled),
        Ok(ShutdownWait::Exited(rc)) => Ok(Some(rc)),
        Ok(ShutdownWait::AlreadyStopped) => Ok(None),
    }
}

pub struct Shutdown;

#[async_trait]
impl Step for Shutdown {
    fn name(&self) -> &'static str {
        "shutdown"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        match shut_down(ctx).await {
            Ok(rc) => {
                if let Some(rc) = rc {
                    info!(rc, "VM shut down");
                    ctx.exit_code = Some(rc);
                    ctx.put_generated("ExitCode", rc);
                }
                StepAction::Continue
            }
            Err(e) => ctx.fail(e),
        }
    }
}

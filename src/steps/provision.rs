use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};

async fn provision(ctx: &BuildContext) -> Result<(), BuildError> {
    let commands = &ctx.config.provision.inline;
    if commands.is_empty() {
        return Ok(());
    }
    let shell = ctx.require_remote()?;

    for (i, cmd) in commands.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }
        info!(step = i + 1, total = commands.len(), command = %cmd, "provisioning");
        let out = tokio::select! {
            res = shell.run(cmd) => res?,
            _ = ctx.cancel.cancelled() => return Err(BuildError::Cancelled),
        };
        if !out.trim().is_empty() {
            debug!(output = %out.trim_end(), "provisioner output");
        }
    }
    Ok(())
}

/// Runs `provision.inline` in the guest, in order.
pub struct Provision;

#[async_trait]
impl Step for Provision {
    fn name(&self) -> &'static str {
        "provision"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        match provision(ctx).await {
            Ok(()) => StepAction::Continue,
            Err(e) => ctx.fail(e),
        }
    }
}

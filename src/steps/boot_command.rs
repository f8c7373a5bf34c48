use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};
use crate::vm::boot_command::{self, BootVars, KeyAction};
use crate::vm::vnc::{VncClient, sleep_or_cancel};

/// Interpolated and parsed boot command for `ctx`.
pub fn boot_actions(ctx: &BuildContext) -> Result<Vec<KeyAction>, BuildError> {
    let vars = BootVars {
        http_ip: ctx.http_ip.clone().unwrap_or_default(),
        http_port: ctx.http_port.map(|p| p.to_string()).unwrap_or_default(),
        name: ctx.config.vm_name.clone(),
    };
    let mut actions = Vec::new();
    for line in &ctx.config.boot.command {
        actions.extend(boot_command::parse(&boot_command::interpolate(line, &vars)?));
    }
    Ok(actions)
}

async fn type_boot_command(ctx: &BuildContext) -> Result<(), BuildError> {
    let actions = boot_actions(ctx)?;
    if actions.is_empty() {
        debug!("no boot command configured");
        return Ok(());
    }
    let endpoint = ctx.require_vnc()?.clone();

    let wait = Duration::from_secs(ctx.config.boot.wait_secs);
    info!("waiting {wait:?} for boot");
    sleep_or_cancel(wait, &ctx.cancel).await?;

    let mut client = VncClient::connect(&endpoint).await?;
    info!(keys = actions.len(), "typing the boot command over VNC");
    let interval = Duration::from_millis(ctx.config.boot.key_interval_ms);
    client.type_actions(&actions, interval, &ctx.cancel).await
}

pub struct TypeBootCommand;

#[async_trait]
impl Step for TypeBootCommand {
    fn name(&self) -> &'static str {
        "type-boot-command"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        match type_boot_command(ctx).await {
            Ok(()) => StepAction::Continue,
            Err(e) => ctx.fail(e),
        }
    }
}

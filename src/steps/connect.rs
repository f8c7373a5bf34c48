use std::time::Duration;

use async_trait::async_trait;

use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};
use crate::vm::remote_shell::RemoteShell;

const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Waits for ssh in the guest and hands the shell to later steps.
pub struct Connect {
    probe_interval: Duration,
}

impl Connect {
    pub fn new() -> Self {
        Self {
            probe_interval: PROBE_INTERVAL,
        }
    }

    pub fn with_probe_interval(probe_interval: Duration) -> Self {
        Self { probe_interval }
    }

    fn shell(ctx: &BuildContext) -> Result<RemoteShell, BuildError> {
        let comm = &ctx.config.comm;
        Ok(RemoteShell {
            ssh: ctx.config.tools.ssh.clone(),
            host: ctx.require_guest_address()?.to_string(),
            port: comm.port,
            username: comm.username.clone(),
            private_key_file: comm.private_key_file.clone(),
        })
    }
}

impl Default for Connect {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for Connect {
    fn name(&self) -> &'static str {
        "connect"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let shell = match Self::shell(ctx) {
            Ok(s) => s,
            Err(e) => return ctx.fail(e),
        };
        let timeout = Duration::from_secs(ctx.config.comm.timeout_secs);
        match shell
            .wait_until_ready(timeout, self.probe_interval, &ctx.cancel)
            .await
        {
            Ok(()) => {
                ctx.remote = Some(shell);
                StepAction::Continue
            }
            Err(e) => ctx.fail(e),
        }
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        ctx.remote = None;
        Ok(())
    }
}

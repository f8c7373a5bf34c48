use async_trait::async_trait;
use tracing::info;

use crate::command;
use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};
use crate::retry::{RetryPolicy, destroy_with_retry};

/// Temporary VNIC over `network.vnic_link`.
pub struct CreateVnic {
    retry: RetryPolicy,
    created: Option<String>,
}

impl CreateVnic {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            created: None,
        }
    }
}

#[async_trait]
impl Step for CreateVnic {
    fn name(&self) -> &'static str {
        "create-vnic"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let net = &ctx.config.network;
        let name = net.vnic_name.clone();
        info!(vnic = %name, link = %net.vnic_link, "creating VNIC");

        let args = ["create-vnic", "-t", "-l", net.vnic_link.as_str(), name.as_str()];
        if let Err(e) = command::run(&ctx.config.tools.dladm, args).await {
            return ctx.fail(e);
        }
        self.created = Some(name);
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let Some(name) = self.created.take() else {
            return Ok(());
        };
        info!(vnic = %name, link = %ctx.config.network.vnic_link, "deleting VNIC");

        let dladm = ctx.config.tools.dladm.clone();
        let _ = destroy_with_retry(&format!("vnic {name}"), self.retry, || {
            command::run(&dladm, ["delete-vnic", name.as_str()])
        })
        .await;
        Ok(())
    }
}

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;

use crate::command;
use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};
use crate::retry::{RetryPolicy, destroy_with_retry};

/// ZFS volume backing the VM disk.
///
/// The volume is destroyed on cleanup whatever the outcome; a successful
/// build has already exported it with the snapshot step.
pub struct CreateZvol {
    retry: RetryPolicy,
    dataset: Option<String>,
}

impl CreateZvol {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            dataset: None,
        }
    }
}

#[async_trait]
impl Step for CreateZvol {
    fn name(&self) -> &'static str {
        "create-zvol"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let dataset = ctx.config.zvol_dataset();
        info!(%dataset, size = %ctx.config.disk.size, "creating ZFS zvol");

        let args = ["create", "-V", ctx.config.disk.size.as_str(), dataset.as_str()];
        if let Err(e) = command::run(&ctx.config.tools.zfs, args).await {
            return ctx.fail(e);
        }

        ctx.disk_path = Some(PathBuf::from(ctx.config.zvol_device()));
        self.dataset = Some(dataset);
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        let Some(dataset) = self.dataset.take() else {
            return Ok(());
        };
        info!(%dataset, "destroying ZFS zvol");

        let zfs = ctx.config.tools.zfs.clone();
        // Exhausted retries are logged by destroy_with_retry; never fails the build.
        let _ = destroy_with_retry(&format!("zvol {dataset}"), self.retry, || {
            command::run(&zfs, ["destroy", dataset.as_str()])
        })
        .await;
        Ok(())
    }
}

use async_trait::async_trait;
use tracing::info;

use crate::command;
use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};

/// Exports the finished zvol into the output directory.
///
/// Three strictly ordered operations: snapshot, send into
/// `<output>/<vm_name>`, delete the snapshot. The first failure halts the
/// build; earlier operations are not rolled back.
pub struct CreateSnapshot;

#[async_trait]
impl Step for CreateSnapshot {
    fn name(&self) -> &'static str {
        "snapshot"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let zfs = ctx.config.tools.zfs.clone();
        let snapshot = format!("{}@final", ctx.config.zvol_dataset());
        let dest = ctx.config.output_directory.join(&ctx.config.vm_name);

        info!(%snapshot, "creating ZFS snapshot");
        if let Err(e) = command::run(&zfs, ["snapshot", snapshot.as_str()]).await {
            return ctx.fail(e);
        }

        info!(%snapshot, dest = %dest.display(), "sending snapshot");
        if let Err(e) = command::run_to_file(&zfs, ["send", snapshot.as_str()], &dest).await {
            return ctx.fail(e);
        }

        info!(%snapshot, "deleting ZFS snapshot");
        if let Err(e) = command::run(&zfs, ["destroy", snapshot.as_str()]).await {
            return ctx.fail(e);
        }

        StepAction::Continue
    }
}

use async_trait::async_trait;
use tracing::info;

use crate::context::BuildContext;
use crate::pipeline::{Step, StepAction};

/// Creates the output directory; removes it again if the build fails.
pub struct PrepareOutputDir {
    force: bool,
}

impl PrepareOutputDir {
    pub fn new(force: bool) -> Self {
        Self { force }
    }
}

#[async_trait]
impl Step for PrepareOutputDir {
    fn name(&self) -> &'static str {
        "prepare-output-dir"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let dir = ctx.config.output_directory.clone();

        if dir.exists() {
            if !self.force {
                return ctx.fail(anyhow::anyhow!(
                    "output directory {} already exists",
                    dir.display()
                ));
            }
            info!(dir = %dir.display(), "deleting previous output directory");
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                return ctx.fail(e);
            }
        }

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return ctx.fail(e);
        }
        StepAction::Continue
    }

    async fn cleanup(&mut self, ctx: &mut BuildContext) -> anyhow::Result<()> {
        if ctx.succeeded() {
            return Ok(());
        }
        let dir = &ctx.config.output_directory;
        info!(dir = %dir.display(), "deleting output directory");
        tokio::fs::remove_dir_all(dir).await?;
        Ok(())
    }
}

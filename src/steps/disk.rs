//! Flat-file VM disk.
//!
//! The disk is a preallocated file inside the output directory
//! (`mkfile -n <size> <output>/<disk.name>`), so it is already where the
//! artifact expects it. There is nothing to release: the output directory
//! step removes it together with the rest of a failed build.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::command;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::{Step, StepAction};

/// `mkfile` arguments for a sparse file of `size` at `path`.
pub fn mkfile_args(size: &str, path: &Path) -> Vec<String> {
    vec!["-n".to_string(), size.to_string(), path.display().to_string()]
}

pub async fn create_disk_file(mkfile: &Path, size: &str, path: &Path) -> Result<(), BuildError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    command::run(mkfile, mkfile_args(size, path)).await?;
    Ok(())
}

pub struct CreateDisk;

impl CreateDisk {
    fn disk_path(ctx: &BuildContext) -> PathBuf {
        ctx.config.output_directory.join(&ctx.config.disk.name)
    }
}

#[async_trait]
impl Step for CreateDisk {
    fn name(&self) -> &'static str {
        "create-disk"
    }

    async fn run(&mut self, ctx: &mut BuildContext) -> StepAction {
        let path = Self::disk_path(ctx);
        info!(path = %path.display(), size = %ctx.config.disk.size, "creating disk image");

        match create_disk_file(&ctx.config.tools.mkfile, &ctx.config.disk.size, &path).await {
            Ok(()) => {
                ctx.disk_path = Some(path);
                StepAction::Continue
            }
            Err(e) => ctx.fail(e),
        }
    }
}

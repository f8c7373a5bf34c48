//! bhyve-image-builder: build a VM disk image from an install ISO on bhyve.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Result;
use bhyve_image_builder::{BuildConfig, Builder, logging};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "bhyve-image-builder", version, about = "Build VM images with bhyve")]
struct Args {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a build from a TOML config
    Build {
        config: PathBuf,
        /// Replace an existing output directory
        #[arg(long, short)]
        force: bool,
    },
    /// Check a config without building
    Validate {
        config: PathBuf,
        #[arg(long, short)]
        force: bool,
    },
}

fn load(path: &Path, force: bool) -> Result<BuildConfig> {
    let (config, warnings) = BuildConfig::prepare(path, force)?;
    for w in warnings {
        warn!("{w}");
    }
    Ok(config)
}

async fn build(path: PathBuf, force: bool) -> Result<()> {
    let config = load(&path, force)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling build");
            on_signal.cancel();
        }
    });

    let artifact = Builder::new(config, force).run(cancel).await?;
    info!("build complete");
    println!("{artifact}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _log_guard = logging::init();
    let args = Args::parse();

    let result = match args.cmd {
        Commands::Build { config, force } => build(config, force).await,
        Commands::Validate { config, force } => load(&config, force).map(|c| {
            info!(vm = %c.vm_name, output = %c.output_directory.display(), "config is valid");
        }),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

//! Assembles the step sequence for a config and drives it to an artifact.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::artifact::Artifact;
use crate::config::BuildConfig;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::paths::BuilderPaths;
use crate::pipeline::{Pipeline, PipelineOutcome, Step};
use crate::retry::RetryPolicy;
use crate::steps::{
    ConfigureVnc, Connect, CreateDisk, CreateSnapshot, CreateVnic, CreateZvol, DownloadIso,
    HostIpDiscover, HttpServer, PrepareOutputDir, Provision, Shutdown, StartVm, TypeBootCommand,
    WaitGuestAddress,
};
use crate::vm::Driver;
use crate::vm::driver::BhyveDriver;

pub struct Builder {
    config: Arc<BuildConfig>,
    force: bool,
    paths: Option<BuilderPaths>,
    retry: RetryPolicy,
}

impl Builder {
    pub fn new(config: BuildConfig, force: bool) -> Self {
        Self {
            config: Arc::new(config),
            force,
            paths: BuilderPaths::resolve(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_paths(mut self, paths: Option<BuilderPaths>) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Steps in execution order for this config.
    pub fn steps(&self) -> Vec<Box<dyn Step>> {
        let config = &self.config;
        let mut steps: Vec<Box<dyn Step>> = vec![
            Box::new(DownloadIso::new(self.paths.clone())),
            Box::new(PrepareOutputDir::new(self.force)),
            Box::new(HostIpDiscover),
            Box::new(HttpServer::new()),
        ];

        if config.disk.use_zvol {
            steps.push(Box::new(CreateZvol::new(self.retry)));
        } else {
            steps.push(Box::new(CreateDisk));
        }
        if config.network.vnic_create {
            steps.push(Box::new(CreateVnic::new(self.retry)));
        }

        steps.extend([
            Box::new(ConfigureVnc) as Box<dyn Step>,
            Box::new(StartVm::new()),
            Box::new(TypeBootCommand),
            Box::new(WaitGuestAddress),
            Box::new(Connect::new()),
            Box::new(Provision),
            Box::new(Shutdown),
        ]);

        if config.disk.use_zvol {
            steps.push(Box::new(CreateSnapshot));
        }
        steps
    }

    /// Run the build against the real hypervisor.
    pub async fn run(&self, cancel: CancellationToken) -> Result<Artifact, BuildError> {
        let driver = Arc::new(BhyveDriver::new(self.config.tools.bhyve.clone()));
        self.run_with(driver, self.steps(), cancel).await
    }

    /// Run `steps` with an explicit driver.
    pub async fn run_with(
        &self,
        driver: Arc<dyn Driver>,
        steps: Vec<Box<dyn Step>>,
        cancel: CancellationToken,
    ) -> Result<Artifact, BuildError> {
        let mut ctx = BuildContext::new(self.config.clone(), driver, cancel);
        let mut pipeline = Pipeline::new(steps);
        info!(steps = ?pipeline.step_names(), vm = %self.config.vm_name, "starting build");

        let outcome = pipeline.run(&mut ctx).await;
        info!(?outcome, "build finished");
        ctx.take_result()?;
        if outcome != PipelineOutcome::Completed {
            return Err(BuildError::Halted);
        }

        Ok(Artifact::collect(
            &self.config,
            std::mem::take(&mut ctx.generated_data),
        ))
    }
}

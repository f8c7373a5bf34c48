//! Fake host tools for integration tests.
//!
//! Every tool is a `/bin/sh` script that appends `<name> <args...>` to a
//! shared call log before running its body, so tests can assert on the exact
//! sequence of host commands a build issued.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bhyve_image_builder::config::{BuildConfig, RawConfig, with_defaults};
use bhyve_image_builder::context::BuildContext;
use bhyve_image_builder::vm::Driver;
use bhyve_image_builder::vm::driver::BhyveDriver;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct FakeTools {
    dir: TempDir,
}

impl FakeTools {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_path(&self) -> PathBuf {
        self.root().join("calls.log")
    }

    /// Write an executable fake `name` running `body` after logging its args.
    pub fn tool(&self, name: &str, body: &str) -> PathBuf {
        let path = self.root().join(name);
        let script = format!(
            "#!/bin/sh\necho \"{name} $*\" >> '{log}'\n{body}\n",
            log = self.log_path().display()
        );
        std::fs::write(&path, script).expect("write fake tool");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod fake tool");
        path
    }

    /// Logged invocations, oldest first.
    pub fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(self.log_path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn calls_of(&self, name: &str) -> Vec<String> {
        let prefix = format!("{name} ");
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(&prefix) || c == name)
            .collect()
    }

    /// A config whose host tools all live in this directory. Tools that were
    /// never written fail with "not found" when spawned.
    pub fn config(&self, build_name: &str) -> BuildConfig {
        let mut raw = RawConfig::default();
        raw.build_name = Some(build_name.to_string());
        raw.output_directory = Some(self.root().join(format!("output-{build_name}")));
        raw.disk.size = "1g".to_string();
        raw.network.host_nic = "igb0".to_string();
        raw.vnc.port_min = 25900;
        raw.vnc.port_max = 26900;

        let tools = &mut raw.tools;
        tools.bhyve = self.root().join("bhyve");
        tools.bhyvectl = self.root().join("bhyvectl");
        tools.zfs = self.root().join("zfs");
        tools.mkfile = self.root().join("mkfile");
        tools.dladm = self.root().join("dladm");
        tools.arp = self.root().join("arp");
        tools.ssh = self.root().join("ssh");

        let mut config = with_defaults(raw);
        config.guest.poll_interval_secs = 1;
        config
    }

    pub fn context(&self, config: BuildConfig) -> BuildContext {
        let driver: Arc<dyn Driver> = Arc::new(BhyveDriver::new(config.tools.bhyve.clone()));
        BuildContext::new(Arc::new(config), driver, CancellationToken::new())
    }
}

/// Poll `cond` every 10ms for up to `limit`.
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

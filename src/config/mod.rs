//! Build configuration.
//!
//! A build is described by a TOML file. [`RawConfig`] mirrors the file: the
//! nested sections carry static defaults through `#[serde(default)]`, while
//! the handful of values derived from the build name stay optional.
//! [`with_defaults`] is the single pure step that turns a raw config into a
//! fully specified [`BuildConfig`]; [`BuildConfig::validate`] then runs one
//! validator per section and aggregates every problem into one error.

pub mod cpu;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BuildError;

pub use cpu::CpuConfig;

/// Builder identifier reported on the artifact.
pub const BUILDER_ID: &str = "bhyve.builder";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Install media.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct IsoConfig {
    /// Local path, `file://` URL or `http(s)://` URL.
    pub url: String,
    /// `none` or `sha256:<hex>`.
    pub checksum: String,
    /// Where a downloaded ISO is stored. Defaults to the user cache dir.
    pub target_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Disk (or volume) name. Empty means `disk-<build_name>`.
    pub name: String,
    /// Size string understood by both `mkfile -n` and `zfs create -V`, e.g. `20g`.
    pub size: String,
    pub use_zvol: bool,
    pub zpool: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Physical host NIC; source of the HTTP server address.
    pub host_nic: String,
    pub vnic_create: bool,
    pub vnic_name: String,
    /// Link the VNIC is created over. Empty means `host_nic`.
    pub vnic_link: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VncConfig {
    pub bind_address: String,
    pub port_min: u32,
    pub port_max: u32,
    pub use_password: bool,
}

impl Default for VncConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port_min: 5900,
            port_max: 6000,
            use_password: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BootConfig {
    /// Boot command lines, concatenated in order before typing.
    pub command: Vec<String>,
    /// Delay between VM start and the first key press.
    pub wait_secs: u64,
    /// Delay between individual key events.
    pub key_interval_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            wait_secs: 10,
            key_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Directory served to the guest during install. `None` disables the server.
    pub directory: Option<PathBuf>,
    pub port_min: u16,
    pub port_max: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            directory: None,
            port_min: 8000,
            port_max: 9000,
        }
    }
}

/// Remote shell (ssh) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CommConfig {
    pub username: String,
    pub port: u16,
    pub private_key_file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            username: "root".to_string(),
            port: 22,
            private_key_file: None,
            timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    pub command: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: 300,
        }
    }
}

/// Guest address discovery.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GuestConfig {
    pub address_timeout_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            address_timeout_secs: 3600,
            poll_interval_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Shell commands run in order inside the guest.
    pub inline: Vec<String>,
}

/// Host programs the build shells out to.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostTools {
    pub bhyve: PathBuf,
    pub bhyvectl: PathBuf,
    pub zfs: PathBuf,
    pub mkfile: PathBuf,
    pub dladm: PathBuf,
    pub arp: PathBuf,
    pub ssh: PathBuf,
}

impl Default for HostTools {
    fn default() -> Self {
        Self {
            bhyve: PathBuf::from("/usr/sbin/bhyve"),
            bhyvectl: PathBuf::from("/usr/sbin/bhyvectl"),
            zfs: PathBuf::from("/usr/sbin/zfs"),
            mkfile: PathBuf::from("/usr/sbin/mkfile"),
            dladm: PathBuf::from("/usr/sbin/dladm"),
            arp: PathBuf::from("/usr/sbin/arp"),
            ssh: PathBuf::from("ssh"),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw and resolved configs
// ---------------------------------------------------------------------------

/// The config file as written by the user.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RawConfig {
    pub build_name: Option<String>,
    pub vm_name: Option<String>,
    pub output_directory: Option<PathBuf>,
    pub memory: Option<u32>,
    pub bootrom: Option<PathBuf>,
    pub iso: IsoConfig,
    pub disk: DiskConfig,
    pub network: NetworkConfig,
    pub vnc: VncConfig,
    pub cpu: CpuConfig,
    pub boot: BootConfig,
    pub http: HttpConfig,
    pub comm: CommConfig,
    pub shutdown: ShutdownConfig,
    pub guest: GuestConfig,
    pub provision: ProvisionConfig,
    pub tools: HostTools,
}

impl RawConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Fully specified, read-only build configuration.
#[derive(Debug, Clone, Serialize)]
pub struct BuildConfig {
    pub build_name: String,
    pub vm_name: String,
    pub output_directory: PathBuf,
    pub memory_mb: u32,
    pub bootrom: PathBuf,
    pub iso: IsoConfig,
    pub disk: DiskConfig,
    pub network: NetworkConfig,
    pub vnc: VncConfig,
    pub cpu: CpuConfig,
    pub boot: BootConfig,
    pub http: HttpConfig,
    pub comm: CommConfig,
    pub shutdown: ShutdownConfig,
    pub guest: GuestConfig,
    pub provision: ProvisionConfig,
    pub tools: HostTools,
}

const DEFAULT_BUILD_NAME: &str = "bhyve";
const DEFAULT_MEMORY_MB: u32 = 1024;
const MIN_MEMORY_MB: u32 = 10;
const FALLBACK_MEMORY_MB: u32 = 512;

/// Resolve every derived default. Pure apart from logging.
pub fn with_defaults(raw: RawConfig) -> BuildConfig {
    let build_name = raw
        .build_name
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_BUILD_NAME.to_string());

    let vm_name = raw
        .vm_name
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("packer-{build_name}"));

    let output_directory = raw
        .output_directory
        .unwrap_or_else(|| PathBuf::from(format!("output-{build_name}")));

    let memory_mb = match raw.memory {
        None => DEFAULT_MEMORY_MB,
        Some(m) if m < MIN_MEMORY_MB => {
            info!(memory = m, "memory is too small, using default: {FALLBACK_MEMORY_MB}");
            FALLBACK_MEMORY_MB
        }
        Some(m) => m,
    };

    let mut disk = raw.disk;
    if disk.name.is_empty() {
        disk.name = format!("disk-{build_name}");
    }
    if disk.zpool.is_empty() {
        disk.zpool = "zones".to_string();
    }

    let mut network = raw.network;
    if network.vnic_name.is_empty() {
        network.vnic_name = "packer0".to_string();
    }
    if network.vnic_link.is_empty() {
        network.vnic_link = network.host_nic.clone();
    }

    let mut vnc = raw.vnc;
    if vnc.bind_address.is_empty() {
        vnc.bind_address = "127.0.0.1".to_string();
    }
    if vnc.port_min == 0 {
        vnc.port_min = 5900;
    }
    if vnc.port_max == 0 {
        vnc.port_max = 6000;
    }

    BuildConfig {
        build_name,
        vm_name,
        output_directory,
        memory_mb,
        bootrom: raw
            .bootrom
            .unwrap_or_else(|| PathBuf::from("/usr/share/bhyve/uefi-rom.bin")),
        iso: raw.iso,
        disk,
        network,
        vnc,
        cpu: raw.cpu,
        boot: raw.boot,
        http: raw.http,
        comm: raw.comm,
        shutdown: raw.shutdown,
        guest: raw.guest,
        provision: raw.provision,
        tools: raw.tools,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Errors and warnings gathered across all sections.
#[derive(Debug, Default)]
struct Findings {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl BuildConfig {
    /// Load, default and validate in one go.
    pub fn prepare(path: &Path, force: bool) -> Result<(Self, Vec<String>), BuildError> {
        let raw = RawConfig::load(path)?;
        let config = with_defaults(raw);
        let warnings = config.validate(force)?;
        Ok((config, warnings))
    }

    /// Check every section. Returns the warnings on success, or every error
    /// found in one [`BuildError::Configuration`].
    pub fn validate(&self, force: bool) -> Result<Vec<String>, BuildError> {
        let mut f = Findings::default();

        self.validate_iso(&mut f);
        self.validate_disk(&mut f);
        self.validate_network(&mut f);
        self.validate_vnc(&mut f);
        self.validate_http(&mut f);
        self.validate_comm(&mut f);
        f.warnings.extend(self.cpu.warnings());

        if !force && self.output_directory.exists() {
            f.errors.push(format!(
                "output directory '{}' already exists; it must not exist",
                self.output_directory.display()
            ));
        }

        if f.errors.is_empty() {
            Ok(f.warnings)
        } else {
            Err(BuildError::Configuration(f.errors))
        }
    }

    fn validate_iso(&self, f: &mut Findings) {
        if self.iso.url.is_empty() {
            f.errors.push("iso.url must be specified".to_string());
        }
        let checksum = self.iso.checksum.trim();
        if checksum.is_empty() {
            f.errors
                .push("iso.checksum must be specified (use \"none\" to skip)".to_string());
        } else if checksum != "none" {
            match checksum.split_once(':') {
                Some(("sha256", hex))
                    if hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit()) => {}
                _ => f.errors.push(format!(
                    "iso.checksum '{checksum}' must be \"none\" or \"sha256:<64 hex digits>\""
                )),
            }
        }
    }

    fn validate_disk(&self, f: &mut Findings) {
        if self.disk.size.is_empty() {
            f.errors.push("disk.size must be specified".to_string());
        }
    }

    fn validate_network(&self, f: &mut Findings) {
        if self.network.host_nic.is_empty() {
            f.errors.push("network.host_nic must be specified".to_string());
        }
    }

    fn validate_vnc(&self, f: &mut Findings) {
        if self.vnc.port_min < 5900 {
            f.errors.push("vnc.port_min cannot be below 5900".to_string());
        }
        if self.vnc.port_min > 65535 || self.vnc.port_max > 65535 {
            f.errors.push(
                "vnc.port_min and vnc.port_max must both be below 65535 to be valid TCP ports"
                    .to_string(),
            );
        }
        if self.vnc.port_min > self.vnc.port_max {
            f.errors
                .push("vnc.port_min must be less than vnc.port_max".to_string());
        }
    }

    fn validate_http(&self, f: &mut Findings) {
        if self.http.port_min > self.http.port_max {
            f.errors
                .push("http.port_min must be less than http.port_max".to_string());
        }
        if let Some(dir) = &self.http.directory {
            if !dir.is_dir() {
                f.errors.push(format!(
                    "http.directory '{}' is not a directory",
                    dir.display()
                ));
            }
        }
    }

    fn validate_comm(&self, f: &mut Findings) {
        if self.comm.username.is_empty() {
            f.errors.push("comm.username must be specified".to_string());
        }
    }

    // ------------------------------------------------------------------
    // Derived values
    // ------------------------------------------------------------------

    /// Dataset backing the VM disk when volumes are used.
    pub fn zvol_dataset(&self) -> String {
        format!("{}/{}", self.disk.zpool, self.vm_name)
    }

    /// Raw device path of the volume, as handed to the hypervisor.
    pub fn zvol_device(&self) -> PathBuf {
        PathBuf::from(format!("/dev/zvol/rdsk/{}", self.zvol_dataset()))
    }

    pub fn guest_address_timeout(&self) -> Duration {
        Duration::from_secs(self.guest.address_timeout_secs)
    }

    pub fn guest_poll_interval(&self) -> Duration {
        Duration::from_secs(self.guest.poll_interval_secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

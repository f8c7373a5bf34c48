//! CPU topology for the hypervisor `-c` argument.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Requested vCPU count and optional socket/core/thread topology.
///
/// A zero in any field means "not specified".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CpuConfig {
    pub cpus: u32,
    pub sockets: u32,
    pub cores: u32,
    pub threads: u32,
}

impl CpuConfig {
    /// Maximum vCPU count the topology describes.
    ///
    /// sockets × cores (when both are set) × threads (when set), falling back
    /// to cores, then threads, then 0 when nothing is specified.
    pub fn max_cpus(&self) -> u32 {
        let mut total = self.sockets;

        if self.cores > 0 && total > 0 {
            total = total.saturating_mul(self.cores);
        }

        if total == 0 {
            total = self.cores;
        }

        if self.threads > 0 && total != 0 {
            total = total.saturating_mul(self.threads);
        }

        if total == 0 {
            total = self.threads;
        }

        total
    }

    /// Effective vCPU count after defaulting and clamping to the topology.
    pub fn effective_cpus(&self) -> u32 {
        let max = self.max_cpus();
        if max == 0 && self.cpus == 0 {
            return 1;
        }

        let mut count = self.cpus;
        if count == 0 {
            info!(max, "CPU count at default value, setting to topology maximum");
            count = max;
        }

        if count > max && max != 0 {
            info!(max, requested = count, "CPU count exceeds topology, clamping");
            count = max;
        }

        count
    }

    /// Non-fatal mismatches between `cpus` and the topology.
    pub fn warnings(&self) -> Vec<String> {
        let max = self.max_cpus();
        let mut out = Vec::new();
        if self.cpus != 0 && max > self.cpus {
            out.push(format!(
                "cpus ({}) is lower than the topology maximum ({max}); this will negatively impact performance",
                self.cpus
            ));
        }
        if self.cpus > max && max != 0 {
            out.push(format!(
                "cpus ({}) is greater than the topology allows, using {max}",
                self.cpus
            ));
        }
        out
    }

    /// Topology string handed to the hypervisor, e.g. `cpus=8,sockets=2,cores=4`.
    pub fn cmdline(&self) -> String {
        if self.max_cpus() == 0 && self.cpus == 0 {
            return "1".to_string();
        }

        for w in self.warnings() {
            warn!("{w}");
        }

        let mut s = format!("cpus={}", self.effective_cpus());
        if self.sockets > 0 {
            s.push_str(&format!(",sockets={}", self.sockets));
        }
        if self.cores > 0 {
            s.push_str(&format!(",cores={}", self.cores));
        }
        if self.threads > 0 {
            s.push_str(&format!(",threads={}", self.threads));
        }
        s
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

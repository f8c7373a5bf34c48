//! Guest address discovery without an in-guest agent.
//!
//! The VNIC's MAC is known as soon as the interface exists, so the guest's IP
//! is whatever row of the host neighbor table carries that MAC once the guest
//! has talked on the network.

use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command;
use crate::error::BuildError;

/// Header lines printed by `arp -a -n` before the first entry.
const NEIGHBOR_TABLE_HEADER_LINES: usize = 3;

/// Zero-pad every octet of a colon-separated MAC (`a:2:ff` → `0a:02:ff`).
///
/// `dladm` strips leading zeros; `arp` never does.
pub fn normalize_mac(raw: &str) -> String {
    raw.trim()
        .split(':')
        .map(|octet| format!("{:0>2}", octet.to_ascii_lowercase()))
        .collect::<Vec<_>>()
        .join(":")
}

/// Find the IP address whose hardware address column matches `mac`.
///
/// Entries have either four fields (`Device IP Mask PhysAddr`) or five when
/// the flags column is populated (`Device IP Mask Flags PhysAddr`). Rows
/// of any other width are skipped.
pub fn scan_neighbor_table(table: &str, mac: &str) -> Option<String> {
    for line in table.lines().skip(NEIGHBOR_TABLE_HEADER_LINES) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let phys = match fields.len() {
            4 => fields[3],
            5 => fields[4],
            0 => continue,
            _ => {
                debug!(line, "unexpected neighbor table row");
                continue;
            }
        };
        if phys.eq_ignore_ascii_case(mac) {
            return Some(fields[1].to_string());
        }
    }
    None
}

/// Polls the neighbor table for the address of one VNIC.
#[derive(Debug, Clone)]
pub struct GuestAddressResolver {
    pub dladm: PathBuf,
    pub arp: PathBuf,
    pub vnic: String,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl GuestAddressResolver {
    /// MAC of the VNIC, normalized. Fails if the interface does not exist.
    pub async fn vnic_mac(&self) -> Result<String, BuildError> {
        let out = command::run(
            &self.dladm,
            ["show-vnic", "-p", "-o", "macaddress", self.vnic.as_str()],
        )
        .await?;

        let raw = out.trim();
        if raw.is_empty() {
            return Err(BuildError::other(format!(
                "no MAC address reported for VNIC {}",
                self.vnic
            )));
        }
        Ok(normalize_mac(raw))
    }

    /// One neighbor table lookup. A failing `arp` counts as "not yet".
    pub async fn lookup(&self, mac: &str) -> Option<String> {
        match command::run(&self.arp, ["-a", "-n"]).await {
            Ok(table) => scan_neighbor_table(&table, mac),
            Err(e) => {
                warn!(error = %e, "could not read neighbor table");
                None
            }
        }
    }

    /// Resolve the guest address. The first of (address found, timeout,
    /// cancellation) wins.
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<String, BuildError> {
        let mac = self.vnic_mac().await?;
        info!(vnic = %self.vnic, %mac, "waiting for the guest address to become available");

        let poll = async {
            loop {
                if let Some(ip) = self.lookup(&mac).await {
                    return ip;
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        tokio::select! {
            ip = poll => {
                info!(%ip, "found guest address");
                Ok(ip)
            }
            _ = tokio::time::sleep(self.timeout) => Err(BuildError::Timeout {
                what: format!("guest address on {}", self.vnic),
                after: self.timeout,
            }),
            _ = cancel.cancelled() => Err(BuildError::Cancelled),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE_FOUR_FIELDS: &str = "\
Net to Media Table: IPv4
Device   IP Address               Mask      Flags      Phys Addr
------ -------------------- --------------- -------- ---------------
igb0   192.168.1.1          255.255.255.255          00:0d:b9:41:c2:10
packer0 192.168.1.57        255.255.255.255          02:08:20:0a:02:ff
";

    const TABLE_FIVE_FIELDS: &str = "\
Net to Media Table: IPv4
Device   IP Address               Mask      Flags      Phys Addr
------ -------------------- --------------- -------- ---------------
igb0   192.168.1.10         255.255.255.255 SPLA     00:0d:b9:41:c2:11
packer0 192.168.1.58        255.255.255.255 U        02:08:20:0a:02:ff
";

    #[test]
    fn unpadded_octets_are_zero_padded() {
        assert_eq!(normalize_mac("a:2:ff"), "0a:02:ff");
        assert_eq!(normalize_mac("2:8:20:a:2:ff\n"), "02:08:20:0a:02:ff");
        assert_eq!(normalize_mac("02:08:20:0A:02:FF"), "02:08:20:0a:02:ff");
    }

    #[test]
    fn scan_finds_ip_in_four_field_layout() {
        assert_eq!(
            scan_neighbor_table(TABLE_FOUR_FIELDS, "02:08:20:0a:02:ff").as_deref(),
            Some("192.168.1.57")
        );
    }

    #[test]
    fn scan_finds_ip_in_five_field_layout() {
        assert_eq!(
            scan_neighbor_table(TABLE_FIVE_FIELDS, "02:08:20:0a:02:ff").as_deref(),
            Some("192.168.1.58")
        );
    }

    #[test]
    fn scan_reports_not_found() {
        assert_eq!(scan_neighbor_table(TABLE_FOUR_FIELDS, "de:ad:be:ef:00:01"), None);
        assert_eq!(scan_neighbor_table(TABLE_FIVE_FIELDS, "de:ad:be:ef:00:01"), None);
    }

    #[test]
    fn header_lines_never_match() {
        let table = "a b c 02:08:20:0a:02:ff\nx\ny\n";
        assert_eq!(scan_neighbor_table(table, "02:08:20:0a:02:ff"), None);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let table = format!("{TABLE_FOUR_FIELDS}garbage row with far too many columns here\n");
        assert_eq!(
            scan_neighbor_table(&table, "02:08:20:0a:02:ff").as_deref(),
            Some("192.168.1.57")
        );
    }
}

//! Pipeline steps, in build order.
//!
//! Each step reads what earlier steps left in the
//! [`BuildContext`](crate::context::BuildContext), records its own outputs
//! there, and on failure records one error and halts.

pub mod bhyve;
pub mod boot_command;
pub mod connect;
pub mod disk;
pub mod download;
pub mod guest_address;
pub mod http;
pub mod output_dir;
pub mod provision;
pub mod shutdown;
pub mod snapshot;
pub mod vnc;
pub mod vnic;
pub mod zvol;

pub use bhyve::StartVm;
pub use boot_command::TypeBootCommand;
pub use connect::Connect;
pub use disk::CreateDisk;
pub use download::DownloadIso;
pub use guest_address::WaitGuestAddress;
pub use http::{HostIpDiscover, HttpServer};
pub use output_dir::PrepareOutputDir;
pub use provision::Provision;
pub use shutdown::Shutdown;
pub use snapshot::CreateSnapshot;
pub use vnc::ConfigureVnc;
pub use vnic::CreateVnic;
pub use zvol::CreateZvol;

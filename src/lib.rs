//! bhyve-image-builder: builds bootable VM disk images on illumos bhyve.
//!
//! A build is a fixed sequence of [`pipeline::Step`]s sharing one
//! [`context::BuildContext`]: fetch the install media, allocate disk and
//! network, boot the installer under [`vm::driver::BhyveDriver`], type the
//! boot command over VNC, provision over ssh, shut down and export.

pub mod artifact;
pub mod builder;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod paths;
pub mod pipeline;
pub mod retry;
pub mod state_machine;
pub mod steps;
pub mod vm;

pub use artifact::Artifact;
pub use builder::Builder;
pub use config::BuildConfig;
pub use error::BuildError;

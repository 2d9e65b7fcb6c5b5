//! HAL trait definitions and implementations.
//!
//! This module defines the traits for host operations and provides both the
//! real (`LinuxHal`) and recording (`FakeHal`) implementations.

pub mod fake_hal;
pub mod host_info_ops;
pub mod linux_hal;
pub mod process_ops;

pub use fake_hal::{FakeHal, FakeResponse, Operation};
pub use host_info_ops::{HostInfoOps, OsReleaseInfo};
pub use linux_hal::LinuxHal;
pub use process_ops::{CommandOptions, ProcessOps};

/// Complete HAL combining all host operation traits.
pub trait SystemHal: ProcessOps + HostInfoOps + Send + Sync {}

/// Automatically implement SystemHal for any type implementing all required traits.
impl<T> SystemHal for T where T: ProcessOps + HostInfoOps + Send + Sync {}

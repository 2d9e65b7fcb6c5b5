//! bootkit host abstraction layer (HAL).
//!
//! Everything that touches the running host (spawning processes, reading
//! `/etc/os-release`, checking privileges) goes through the traits in this
//! crate so that providers and the engine can be tested against [`FakeHal`].

pub mod hal;
pub mod os_release;
pub mod platform;

pub use bootkit_error::{HalError, HalResult};
pub use hal::{
    CommandOptions, FakeHal, FakeResponse, HostInfoOps, LinuxHal, Operation, OsReleaseInfo,
    ProcessOps, SystemHal,
};
pub use platform::{debian_arch, probe, PlatformFacts};

/// Privilege checks for runs that mutate the host.
pub trait Hal: Send + Sync {
    fn ensure_root(&self) -> HalResult<()>;
}

impl Hal for LinuxHal {
    fn ensure_root(&self) -> HalResult<()> {
        if !nix::unistd::geteuid().is_root() {
            return Err(HalError::PermissionDenied);
        }
        Ok(())
    }
}

impl Hal for FakeHal {
    fn ensure_root(&self) -> HalResult<()> {
        if !self.is_root() {
            return Err(HalError::PermissionDenied);
        }
        Ok(())
    }
}

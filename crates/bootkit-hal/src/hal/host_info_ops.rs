//! Host information (read-only).
//!
//! This is "world-touching" (reads `/etc`) and belongs in the HAL.

use crate::HalResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsReleaseInfo {
    pub id: Option<String>,
    pub version_id: Option<String>,
    pub version_codename: Option<String>,
    pub ubuntu_codename: Option<String>,
}

impl OsReleaseInfo {
    /// Release codename, preferring `VERSION_CODENAME` over `UBUNTU_CODENAME`.
    pub fn codename(&self) -> Option<&str> {
        self.version_codename
            .as_deref()
            .or(self.ubuntu_codename.as_deref())
    }
}

pub trait HostInfoOps {
    fn hostname(&self) -> HalResult<Option<String>>;
    fn os_release(&self) -> HalResult<OsReleaseInfo>;
    /// Machine architecture as reported by the toolchain (`x86_64`, `aarch64`, ...).
    fn machine_arch(&self) -> String;
}

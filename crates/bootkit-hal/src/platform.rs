//! Platform probe: the host facts providers are selected by.

use crate::hal::HostInfoOps;
use crate::{HalError, HalResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformFacts {
    pub os_id: Option<String>,
    pub os_codename: String,
    /// Debian architecture name (`amd64`, `arm64`, ...).
    pub architecture: String,
}

impl PlatformFacts {
    pub fn new(os_codename: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os_id: None,
            os_codename: os_codename.into(),
            architecture: architecture.into(),
        }
    }
}

/// Maps a toolchain architecture name to the name apt uses.
pub fn debian_arch(machine: &str) -> String {
    match machine {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" | "armv7" => "armhf",
        "x86" | "i686" => "i386",
        "powerpc64" => "ppc64el",
        other => other,
    }
    .to_string()
}

/// Collects `{codename, architecture}`; either may be overridden by the caller.
pub fn probe(
    host: &dyn HostInfoOps,
    codename_override: Option<&str>,
    arch_override: Option<&str>,
) -> HalResult<PlatformFacts> {
    let release = host.os_release()?;
    let os_codename = match codename_override {
        Some(codename) => codename.to_lowercase(),
        None => release
            .codename()
            .map(str::to_string)
            .ok_or_else(|| {
                HalError::Parse("os-release has no VERSION_CODENAME or UBUNTU_CODENAME".into())
            })?,
    };
    let architecture = arch_override
        .map(str::to_string)
        .unwrap_or_else(|| debian_arch(&host.machine_arch()));

    log::debug!(
        "Platform probe: id={:?} codename={} arch={}",
        release.id,
        os_codename,
        architecture
    );

    Ok(PlatformFacts {
        os_id: release.id,
        os_codename,
        architecture,
    })
}

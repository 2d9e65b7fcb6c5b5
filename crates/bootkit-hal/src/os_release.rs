//! Parsing helpers for `/etc/os-release`.

use crate::hal::OsReleaseInfo;

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

/// Parses `os-release` content.
///
/// `id` and the codenames are lowercased; empty values are treated as absent.
pub fn parse_os_release(content: &str) -> OsReleaseInfo {
    let mut info = OsReleaseInfo::default();

    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = unquote(value);
        if value.is_empty() {
            continue;
        }
        match key {
            "ID" => info.id = Some(value.to_lowercase()),
            "VERSION_ID" => info.version_id = Some(value),
            "VERSION_CODENAME" => info.version_codename = Some(value.to_lowercase()),
            "UBUNTU_CODENAME" => info.ubuntu_codename = Some(value.to_lowercase()),
            _ => {}
        }
    }

    info
}

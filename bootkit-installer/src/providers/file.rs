use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionError, ActionResult, Applied};
use serde::Deserialize;
use std::fs::{self, File};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileParams {
    /// Absolute path on the target.
    pub path: String,
    pub content: String,
    /// Octal permission string such as "0644".
    #[serde(default)]
    pub mode: Option<String>,
}

/// Writes a whole file with exact content.
#[derive(Debug)]
pub struct FileProvider {
    params: FileParams,
    mode: Option<u32>,
}

impl FileProvider {
    pub fn new(params: FileParams) -> anyhow::Result<Self> {
        if !params.path.starts_with('/') {
            bail!("file path must be absolute: {}", params.path);
        }
        let mode = params.mode.as_deref().map(parse_mode).transpose()?;
        Ok(Self { params, mode })
    }
}

pub fn parse_mode(mode: &str) -> anyhow::Result<u32> {
    let digits = mode.trim_start_matches("0o");
    match u32::from_str_radix(digits, 8) {
        Ok(value) if value <= 0o7777 => Ok(value),
        _ => bail!("invalid file mode {:?} (expected octal like \"0644\")", mode),
    }
}

impl Action for FileProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let target = ctx.host_path(&self.params.path);
        if ctx.dry_run {
            log::info!(
                "DRY RUN: {}: would write {} ({} bytes)",
                ctx.step,
                target.display(),
                self.params.content.len()
            );
            return Ok(Applied::Done);
        }
        write_file_atomic(&target, self.params.content.as_bytes(), self.mode)
            .map_err(|err| io_failure(&target, err))?;
        log::info!("{}: wrote {}", ctx.step, target.display());
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        let target = ctx.host_path(&self.params.path);
        let Ok(content) = fs::read_to_string(&target) else {
            return Ok(false);
        };
        if content != self.params.content {
            return Ok(false);
        }
        if let Some(mode) = self.mode {
            let actual = fs::metadata(&target)
                .map_err(|err| io_failure(&target, err))?
                .permissions()
                .mode();
            return Ok(actual & 0o7777 == mode);
        }
        Ok(true)
    }

    fn describe(&self) -> String {
        format!("write {}", self.params.path)
    }
}

pub(crate) fn io_failure(path: &Path, err: io::Error) -> ActionError {
    ActionError::permanent(format!("{}: {}", path.display(), err))
}

/// temp file + fsync + rename, so readers never see a partial file.
pub(crate) fn write_file_atomic(path: &Path, content: &[u8], mode: Option<u32>) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let mut file = File::create(&tmp)?;
    file.write_all(content)?;
    if let Some(mode) = mode {
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            dir.sync_all().ok();
        }
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.bootkit-tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::harness::Harness;

    fn provider(path: &str, content: &str, mode: Option<&str>) -> FileProvider {
        FileProvider::new(FileParams {
            path: path.to_string(),
            content: content.to_string(),
            mode: mode.map(str::to_string),
        })
        .unwrap()
    }

    #[test]
    fn writes_under_root_and_verifies() {
        let h = Harness::new();
        let ctx = h.ctx("fail2ban-jail", false);
        let file = provider("/etc/fail2ban/jail.d/bootkit.local", "[sshd]\n", Some("0640"));

        assert!(!file.verify(&ctx).unwrap());
        file.apply(&ctx).unwrap();
        let written = h.root.path().join("etc/fail2ban/jail.d/bootkit.local");
        assert_eq!(fs::read_to_string(&written).unwrap(), "[sshd]\n");
        assert_eq!(fs::metadata(&written).unwrap().permissions().mode() & 0o7777, 0o640);
        assert!(file.verify(&ctx).unwrap());

        fs::write(&written, "edited").unwrap();
        assert!(!file.verify(&ctx).unwrap());
        assert_eq!(h.hal.operation_count(), 0);
    }

    #[test]
    fn dry_run_writes_nothing() {
        let h = Harness::new();
        provider("/etc/motd", "hi", None)
            .apply(&h.ctx("motd", true))
            .unwrap();
        assert!(!h.root.path().join("etc/motd").exists());
    }

    #[test]
    fn rejects_relative_paths_and_bad_modes() {
        assert!(FileProvider::new(FileParams {
            path: "etc/motd".into(),
            content: String::new(),
            mode: None,
        })
        .is_err());
        assert_eq!(parse_mode("0644").unwrap(), 0o644);
        assert_eq!(parse_mode("0o600").unwrap(), 0o600);
        assert!(parse_mode("0999").is_err());
        assert!(parse_mode("77777").is_err());
    }
}

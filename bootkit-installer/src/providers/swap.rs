use super::file::{io_failure, write_file_atomic};
use super::{run, PROBE_TIMEOUT};
use anyhow::bail;
use bootkit_core::{Action, ActionContext, ActionResult, Applied};
use bootkit_hal::CommandOptions;
use serde::Deserialize;
use std::fs;
use std::io;
use std::time::Duration;

const SWAP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

fn default_path() -> String {
    "/swapfile".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SwapParams {
    #[serde(default = "default_path")]
    pub path: String,
    pub size_mb: u64,
}

#[derive(Debug)]
pub struct SwapfileProvider {
    params: SwapParams,
}

impl SwapfileProvider {
    pub fn new(params: SwapParams) -> anyhow::Result<Self> {
        if !params.path.starts_with('/') {
            bail!("swapfile path must be absolute: {}", params.path);
        }
        if params.size_mb == 0 {
            bail!("swapfile size_mb must be positive");
        }
        Ok(Self { params })
    }

    fn fstab_entry(&self) -> String {
        format!("{} none swap sw 0 0", self.params.path)
    }

    /// Raw fstab bytes; a missing file is empty, any other read error fails.
    fn read_fstab(&self, ctx: &ActionContext<'_>) -> ActionResult<Vec<u8>> {
        let path = ctx.host_path("/etc/fstab");
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(io_failure(&path, err)),
        }
    }

    fn fstab_has_entry(&self, fstab: &[u8]) -> bool {
        fstab.split(|&b| b == b'\n').any(|line| {
            String::from_utf8_lossy(line).split_whitespace().next()
                == Some(self.params.path.as_str())
        })
    }

    /// Whether `device` carries a swap signature. blkid exits non-zero when it
    /// finds none.
    fn is_swap_area(&self, ctx: &ActionContext<'_>, device: &str) -> bool {
        match ctx.hal.command_output(
            "blkid",
            &["-p", "-s", "TYPE", "-o", "value", device],
            PROBE_TIMEOUT,
        ) {
            Ok(output) => String::from_utf8_lossy(&output.stdout).trim() == "swap",
            Err(err) => {
                log::debug!("{}: blkid on {}: {}", ctx.step, device, err);
                false
            }
        }
    }

    fn is_active(&self, ctx: &ActionContext<'_>, device: &str) -> ActionResult<bool> {
        let output = ctx.hal.command_output(
            "swapon",
            &["--show=NAME", "--noheadings"],
            PROBE_TIMEOUT,
        )?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|line| line.trim() == device))
    }

    fn create(&self, ctx: &ActionContext<'_>, device: &str) -> ActionResult<()> {
        let opts = CommandOptions::default();
        let size = format!("{}M", self.params.size_mb);
        // fallocate is not supported everywhere (older btrfs, some overlays).
        if let Err(err) = run(ctx, "fallocate", &["-l", size.as_str(), device], opts, SWAP_TIMEOUT) {
            log::warn!("{}: fallocate failed ({}); writing zeros instead", ctx.step, err);
            let count = format!("count={}", self.params.size_mb);
            let of = format!("of={}", device);
            run(
                ctx,
                "dd",
                &["if=/dev/zero", of.as_str(), "bs=1M", count.as_str(), "status=none"],
                opts,
                SWAP_TIMEOUT,
            )?;
        }
        self.format(ctx, device)
    }

    fn format(&self, ctx: &ActionContext<'_>, device: &str) -> ActionResult<()> {
        let opts = CommandOptions::default();
        run(ctx, "chmod", &["600", device], opts, PROBE_TIMEOUT)?;
        run(ctx, "mkswap", &[device], opts, SWAP_TIMEOUT)?;
        Ok(())
    }
}

impl Action for SwapfileProvider {
    fn apply(&self, ctx: &ActionContext<'_>) -> ActionResult<Applied> {
        let target = ctx.host_path(&self.params.path);
        let device = target.to_string_lossy().into_owned();

        let fresh = !target.exists();
        if fresh {
            self.create(ctx, &device)?;
        }

        let active = !ctx.dry_run && self.is_active(ctx, &device)?;
        if !fresh && !active && !ctx.dry_run {
            // Left behind by an interrupted earlier run.
            if self.is_swap_area(ctx, &device) {
                log::info!("{}: {} already exists; not recreating it", ctx.step, device);
            } else {
                log::warn!("{}: {} is not a swap area; formatting it", ctx.step, device);
                self.format(ctx, &device)?;
            }
        }

        if !active {
            run(ctx, "swapon", &[device.as_str()], CommandOptions::default(), SWAP_TIMEOUT)?;
        }

        let mut fstab = self.read_fstab(ctx)?;
        if !self.fstab_has_entry(&fstab) {
            let fstab_path = ctx.host_path("/etc/fstab");
            if ctx.dry_run {
                log::info!(
                    "DRY RUN: {}: would append {:?} to {}",
                    ctx.step,
                    self.fstab_entry(),
                    fstab_path.display()
                );
            } else {
                if fstab.last().is_some_and(|&b| b != b'\n') {
                    fstab.push(b'\n');
                }
                fstab.extend_from_slice(self.fstab_entry().as_bytes());
                fstab.push(b'\n');
                write_file_atomic(&fstab_path, &fstab, Some(0o644))
                    .map_err(|err| io_failure(&fstab_path, err))?;
            }
        }
        Ok(Applied::Done)
    }

    fn verify(&self, ctx: &ActionContext<'_>) -> ActionResult<bool> {
        let device = ctx.host_path(&self.params.path).to_string_lossy().into_owned();
        Ok(self.fstab_has_entry(&self.read_fstab(ctx)?) && self.is_active(ctx, &device)?)
    }

    fn describe(&self) -> String {
        format!("{} MiB swap at {}", self.params.size_mb, self.params.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::harness::Harness;
    use bootkit_hal::FakeResponse;

    fn provider() -> SwapfileProvider {
        SwapfileProvider::new(SwapParams {
            path: "/swapfile".into(),
            size_mb: 2048,
        })
        .unwrap()
    }

    #[test]
    fn creates_activates_and_persists() {
        let h = Harness::new();
        let root = h.root.path();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/fstab"), "UUID=abc / ext4 defaults 0 1").unwrap();
        let device = root.join("swapfile").to_string_lossy().into_owned();

        provider().apply(&h.ctx("swapfile", false)).unwrap();

        assert_eq!(
            h.hal.command_lines(),
            vec![
                format!("fallocate -l 2048M {device}"),
                format!("chmod 600 {device}"),
                format!("mkswap {device}"),
                "swapon --show=NAME --noheadings".to_string(),
                format!("swapon {device}"),
            ]
        );
        assert_eq!(
            fs::read_to_string(root.join("etc/fstab")).unwrap(),
            "UUID=abc / ext4 defaults 0 1\n/swapfile none swap sw 0 0\n"
        );

        h.hal.respond("swapon --show", FakeResponse::ok(format!("{device}\n")));
        assert!(provider().verify(&h.ctx("swapfile", false)).unwrap());
    }

    #[test]
    fn falls_back_to_dd_when_fallocate_fails() {
        let h = Harness::new();
        h.hal.fail_times("fallocate", 1);
        provider().apply(&h.ctx("swapfile", false)).unwrap();
        let lines = h.hal.command_lines();
        assert!(lines[1].starts_with("dd if=/dev/zero of="));
        assert!(lines[1].ends_with("bs=1M count=2048 status=none"));
    }

    #[test]
    fn existing_active_swap_is_left_alone() {
        let h = Harness::new();
        let root = h.root.path();
        fs::write(root.join("swapfile"), b"").unwrap();
        fs::create_dir_all(root.join("etc")).unwrap();
        fs::write(root.join("etc/fstab"), "/swapfile none swap sw 0 0\n").unwrap();
        let device = root.join("swapfile").to_string_lossy().into_owned();
        h.hal.respond("swapon --show", FakeResponse::ok(device));

        provider().apply(&h.ctx("swapfile", false)).unwrap();
        assert_eq!(
            h.hal.command_lines(),
            vec!["swapon --show=NAME --noheadings"]
        );
    }

    #[test]
    fn rerun_formats_a_file_left_by_failed_mkswap() {
        let h = Harness::new();
        let root = h.root.path();
        let device = root.join("swapfile").to_string_lossy().into_owned();
        h.hal.fail_times("mkswap", 1);
        assert!(provider().apply(&h.ctx("swapfile", false)).is_err());

        // What fallocate left on disk before mkswap failed.
        fs::write(root.join("swapfile"), vec![0u8; 4096]).unwrap();
        h.hal.clear();
        provider().apply(&h.ctx("swapfile", false)).unwrap();
        assert_eq!(
            h.hal.command_lines(),
            vec![
                "swapon --show=NAME --noheadings".to_string(),
                format!("blkid -p -s TYPE -o value {device}"),
                format!("chmod 600 {device}"),
                format!("mkswap {device}"),
                format!("swapon {device}"),
            ]
        );
    }

    #[test]
    fn inactive_existing_swap_area_is_only_enabled() {
        let h = Harness::new();
        let root = h.root.path();
        fs::write(root.join("swapfile"), b"").unwrap();
        let device = root.join("swapfile").to_string_lossy().into_owned();
        h.hal.respond("blkid", FakeResponse::ok("swap\n"));

        provider().apply(&h.ctx("swapfile", false)).unwrap();
        assert_eq!(
            h.hal.command_lines(),
            vec![
                "swapon --show=NAME --noheadings".to_string(),
                format!("blkid -p -s TYPE -o value {device}"),
                format!("swapon {device}"),
            ]
        );
    }

    #[test]
    fn fstab_with_non_utf8_bytes_is_preserved() {
        let h = Harness::new();
        let root = h.root.path();
        fs::create_dir_all(root.join("etc")).unwrap();
        let original: &[u8] = b"# caf\xe9\nUUID=abc / ext4 defaults 0 1\nUUID=def /home ext4 defaults 0 2";
        fs::write(root.join("etc/fstab"), original).unwrap();

        provider().apply(&h.ctx("swapfile", false)).unwrap();

        let mut expected = original.to_vec();
        expected.extend_from_slice(b"\n/swapfile none swap sw 0 0\n");
        assert_eq!(fs::read(root.join("etc/fstab")).unwrap(), expected);
    }

    #[test]
    fn unreadable_fstab_fails_without_rewriting_it() {
        let h = Harness::new();
        let root = h.root.path();
        // A directory where the file should be: reading it is an I/O error.
        fs::create_dir_all(root.join("etc/fstab")).unwrap();

        let err = provider().apply(&h.ctx("swapfile", false)).unwrap_err();
        assert!(!err.is_transient());
        assert!(root.join("etc/fstab").is_dir());
    }
}

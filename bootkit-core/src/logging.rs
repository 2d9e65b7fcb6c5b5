//! Logger setup for the bootkit binary (env_logger behind the `log` facade).

use env_logger::Target;
use std::fs;
use std::io;
use std::path::Path;

pub const DEFAULT_LOG_PATH: &str = "/var/log/bootkit/bootkit.log";

/// Initialise the global logger.
///
/// Provisioning runs are often unattended, so logs go to `log_path` when it can
/// be opened; otherwise (no permissions, read-only FS) they go to stderr.
/// `RUST_LOG` still overrides the level.
pub fn init(verbose: bool, log_path: Option<&Path>) {
    let target = log_path
        .and_then(|path| open_log_file(path).ok())
        .unwrap_or(Target::Stderr);

    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(target)
        .try_init();
}

fn open_log_file(path: &Path) -> io::Result<Target> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Target::Pipe(Box::new(file)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_log_file_in_missing_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs/bootkit.log");
        assert!(open_log_file(&path).is_ok());
        assert!(path.exists());
    }
}

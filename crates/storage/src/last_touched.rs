#![forbid(unsafe_code)]
//! "Last issue touched" affinity.
//!
//! A process-local convenience file, not core state: writes are
//! best-effort and never fail the calling operation.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

const LAST_TOUCHED_FILE: &str = "last-touched";

fn last_touched_path(workspace_dir: &Path) -> PathBuf {
    workspace_dir.join(LAST_TOUCHED_FILE)
}

/// Best-effort write of the last-touched issue ID.
pub fn set_last_touched_id(workspace_dir: &Path, id: &str) {
    let _ = write_private_line(&last_touched_path(workspace_dir), id);
}

fn write_private_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")
}

/// Read the last-touched issue ID; empty when missing or unreadable.
pub fn get_last_touched_id(workspace_dir: &Path) -> String {
    fs::read_to_string(last_touched_path(workspace_dir))
        .ok()
        .and_then(|contents| contents.lines().next().map(|line| line.trim().to_owned()))
        .unwrap_or_default()
}

pub fn clear_last_touched(workspace_dir: &Path) {
    let _ = fs::remove_file(last_touched_path(workspace_dir));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear_round_trip() {
        let dir = tempfile::tempdir().expect("temp dir");
        assert_eq!(get_last_touched_id(dir.path()), "");

        set_last_touched_id(dir.path(), "wk-abc123");
        assert_eq!(get_last_touched_id(dir.path()), "wk-abc123");

        clear_last_touched(dir.path());
        assert_eq!(get_last_touched_id(dir.path()), "");
    }

    #[cfg(unix)]
    #[test]
    fn file_is_private() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().expect("temp dir");
        set_last_touched_id(dir.path(), "wk-abc123");
        let mode = fs::metadata(dir.path().join(LAST_TOUCHED_FILE))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

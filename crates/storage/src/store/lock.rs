#![forbid(unsafe_code)]
//! Cross-process advisory lock for the sync engine.
//!
//! Import and full export hold `.sync.lock` for the whole atomic sequence
//! (snapshot, temp write, rename, metadata update). The lock releases on
//! drop.

use super::{StoreError, SYNC_LOCK_FILE};
use std::fs::OpenOptions;
use std::path::Path;

pub struct SyncLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<std::fs::File>,
    #[cfg(not(unix))]
    _file: std::fs::File,
}

impl SyncLock {
    pub fn acquire(workspace_dir: &Path) -> Result<Self, StoreError> {
        let path = workspace_dir.join(SYNC_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        #[cfg(unix)]
        {
            let flock = nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive)
                .map_err(|(_, errno)| {
                    StoreError::Io(std::io::Error::from_raw_os_error(errno as i32))
                })?;
            Ok(Self { _flock: flock })
        }
        #[cfg(not(unix))]
        {
            Ok(Self { _file: file })
        }
    }
}

#![forbid(unsafe_code)]
//! Freshness detection and sync bookkeeping in the `metadata` table.

use super::config::CONFIG_ISSUE_PREFIX;
use super::support::immediate_tx;
use super::{dirty, SqliteStore, StoreError};
use braid_core::hash::hex;
use braid_core::idgen::split_id;
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read as _;
use std::path::Path;

pub const META_JSONL_CONTENT_HASH: &str = "jsonl_content_hash";
pub const META_JSONL_FILE_HASH: &str = "jsonl_file_hash";
pub const META_LAST_IMPORT_TIME: &str = "last_import_time";
pub const META_LAST_EXPORT_TIME: &str = "last_export_time";
pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_WORKSPACE_ID: &str = "workspace_id";

pub(crate) fn get_metadata_tx(
    conn: &Connection,
    key: &str,
) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT value FROM metadata WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?)
}

pub(crate) fn set_metadata_tx(conn: &Connection, key: &str, value: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO metadata(key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn delete_metadata_tx(conn: &Connection, key: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM metadata WHERE key = ?1", params![key])?;
    Ok(())
}

/// SHA-256 of a file's bytes; `None` when the file is absent.
pub(crate) fn file_sha256(path: &Path) -> Result<Option<String>, StoreError> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Some(hex(&hasher.finalize())))
}

impl SqliteStore {
    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        get_metadata_tx(&self.conn, key)
    }

    pub fn set_metadata(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        set_metadata_tx(&self.conn, key, value)
    }

    pub fn workspace_id(&self) -> Result<String, StoreError> {
        self.get_metadata(META_WORKSPACE_ID)?
            .ok_or_else(|| StoreError::Schema("workspace_id is not initialized".to_string()))
    }

    /// Cold-start bookkeeping: workspace id, schema version, and the issue
    /// prefix (inferred from the mirror when possible, otherwise the
    /// workspace directory name).
    pub(crate) fn bootstrap_identity(&mut self) -> Result<(), StoreError> {
        if self.get_metadata(META_WORKSPACE_ID)?.is_none() {
            let mut hasher = Sha256::new();
            hasher.update(self.workspace_dir.to_string_lossy().as_bytes());
            hasher.update(now_ms().to_string().as_bytes());
            let id = hex(&hasher.finalize())[..16].to_string();
            self.set_metadata(META_WORKSPACE_ID, &id)?;
        }
        self.set_metadata(
            META_SCHEMA_VERSION,
            &super::support::SCHEMA_VERSION.to_string(),
        )?;

        if self.get_config(CONFIG_ISSUE_PREFIX)?.is_none() {
            let inferred = self
                .infer_prefix_from_mirror()?
                .or_else(|| {
                    self.workspace_dir
                        .file_name()
                        .map(|name| name.to_string_lossy().to_string())
                })
                .unwrap_or_else(|| "wk".to_string());
            self.set_config(CONFIG_ISSUE_PREFIX, &inferred)?;
        }
        Ok(())
    }

    /// The common prefix of all IDs in the mirror, when it is unique.
    fn infer_prefix_from_mirror(&self) -> Result<Option<String>, StoreError> {
        let path = self.mirror_path();
        let Ok(contents) = std::fs::read_to_string(&path) else {
            return Ok(None);
        };
        let mut prefixes: BTreeSet<String> = BTreeSet::new();
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                return Ok(None);
            };
            if let Some(id) = value.get("id").and_then(|id| id.as_str()) {
                match split_id(id) {
                    Some((prefix, _)) => {
                        prefixes.insert(prefix.to_string());
                    }
                    None => return Ok(None),
                }
            }
        }
        if prefixes.len() == 1 {
            Ok(prefixes.into_iter().next())
        } else {
            Ok(None)
        }
    }

    /// Auto-import staleness check. An mtime gate (lstat, so symlinks are
    /// respected as symlinks) avoids hashing an unchanged mirror.
    pub fn is_mirror_stale(&self) -> Result<bool, StoreError> {
        let path = self.mirror_path();
        let Ok(meta) = std::fs::symlink_metadata(&path) else {
            return Ok(false);
        };

        if let Some(last_import) = self.get_metadata(META_LAST_IMPORT_TIME)? {
            if let (Ok(last_import_ms), Ok(modified)) =
                (last_import.parse::<i64>(), meta.modified())
            {
                let mtime_ms = modified
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(i64::MAX);
                if mtime_ms <= last_import_ms {
                    return Ok(false);
                }
            }
        }

        let Some(current) = file_sha256(&path)? else {
            return Ok(false);
        };
        Ok(self.get_metadata(META_JSONL_CONTENT_HASH)?.as_deref() != Some(current.as_str()))
    }

    /// Integrity guard before an incremental export: when the mirror no
    /// longer matches `jsonl_file_hash` (out-of-band edits, merges), clear
    /// the export hashes and force a full export to restore convergence.
    pub(crate) fn ensure_export_integrity(&mut self, path: &Path) -> Result<bool, StoreError> {
        let recorded = self.get_metadata(META_JSONL_FILE_HASH)?;
        let current = file_sha256(path)?;
        let consistent = matches!(
            (&recorded, &current),
            (Some(recorded), Some(current)) if recorded == current
        );
        if consistent {
            return Ok(false);
        }

        tracing::debug!("mirror drifted from last known hash; forcing full export");
        let tx = immediate_tx(&mut self.conn)?;
        dirty::clear_all_export_hashes_tx(&tx)?;
        delete_metadata_tx(&tx, META_JSONL_FILE_HASH)?;
        tx.commit()?;
        Ok(true)
    }
}

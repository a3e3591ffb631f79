#![forbid(unsafe_code)]
//! Atomic export of the textual mirror.
//!
//! The snapshot excludes ephemerals, keeps tombstones, sorts by ID, and
//! recomputes every content hash (the stored hash is never trusted at this
//! stage). Bytes go to a temporary sibling, are fsynced, then renamed into
//! place; the existing mirror is untouched on any failure.

use super::{
    dirty, lock::SyncLock, meta, paths, ExportOptions, ExportReport, SqliteStore, StoreError,
};
use braid_core::hash::{content_hash, hex};
use braid_core::timefmt::now_ms;
use rusqlite::params;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::io::Write as _;
use std::path::Path;

const DEFAULT_MIRROR_MODE: u32 = 0o600;

impl SqliteStore {
    /// Export to the workspace's canonical mirror location.
    pub fn export(&mut self, options: &ExportOptions) -> Result<ExportReport, StoreError> {
        let path = self.mirror_path();
        self.export_to(&path, options)
    }

    pub fn export_to(
        &mut self,
        path: &Path,
        options: &ExportOptions,
    ) -> Result<ExportReport, StoreError> {
        let target = paths::ensure_safe_mirror_path(&self.workspace_dir, path)?;
        let _lock = SyncLock::acquire(&self.workspace_dir)?;

        let force_full = self.ensure_export_integrity(&target)?;
        let full = options.full || force_full;

        // Snapshot: no ephemerals, tombstones included, deterministic order.
        let mut snapshot = self.all_issues_with_relations()?;
        snapshot.retain(|issue| !issue.ephemeral);
        for issue in &mut snapshot {
            issue.content_hash = Some(content_hash(issue));
        }

        let dirty_ids = self.get_dirty_ids()?;
        if !full {
            let mut report = ExportReport::default();
            let mut needs_write = false;
            let in_snapshot: HashSet<&str> =
                snapshot.iter().map(|issue| issue.id.as_str()).collect();
            for id in &dirty_ids {
                if !in_snapshot.contains(id.as_str()) {
                    // Ephemeral or hard-deleted since marking; nothing to write.
                    continue;
                }
                let current = snapshot
                    .iter()
                    .find(|issue| &issue.id == id)
                    .and_then(|issue| issue.content_hash.clone());
                if current.is_some() && current == self.get_export_hash(id)? {
                    report.unchanged += 1;
                } else {
                    needs_write = true;
                }
            }
            if !needs_write {
                // Equal hashes still clear their dirty bits.
                self.clear_dirty(&dirty_ids)?;
                report.skipped = true;
                return Ok(report);
            }
        }

        if full && snapshot.is_empty() {
            let existing = std::fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
            if existing > 0 && !options.allow_empty_overwrite {
                return Err(StoreError::Conflict(
                    "refusing to overwrite a non-empty mirror from an empty store".to_string(),
                ));
            }
        }

        let mut bytes: Vec<u8> = Vec::new();
        for issue in &snapshot {
            let line = serde_json::to_string(issue).map_err(|err| {
                StoreError::Conflict(format!("serialize {}: {err}", issue.id))
            })?;
            bytes.extend_from_slice(line.as_bytes());
            bytes.push(b'\n');
        }
        let file_hash = hex(&Sha256::digest(&bytes));

        write_atomically(&target, &bytes, options.file_mode.unwrap_or(DEFAULT_MIRROR_MODE))?;

        let now = now_ms();
        let export_entries: Vec<(String, String)> = snapshot
            .iter()
            .map(|issue| {
                (
                    issue.id.clone(),
                    issue.content_hash.clone().unwrap_or_default(),
                )
            })
            .collect();

        let tx = super::support::immediate_tx(&mut self.conn)?;
        {
            let mut stmt =
                tx.prepare("UPDATE issues SET content_hash = ?2 WHERE id = ?1")?;
            for (id, hash) in &export_entries {
                stmt.execute(params![id, hash])?;
            }
        }
        dirty::set_export_hashes_tx(&tx, &export_entries, now)?;
        meta::set_metadata_tx(&tx, meta::META_JSONL_CONTENT_HASH, &file_hash)?;
        meta::set_metadata_tx(&tx, meta::META_JSONL_FILE_HASH, &file_hash)?;
        meta::set_metadata_tx(&tx, meta::META_LAST_EXPORT_TIME, &now.to_string())?;
        {
            // Only IDs actually written to the mirror lose their dirty bit.
            let mut stmt = tx.prepare("DELETE FROM dirty_issues WHERE issue_id = ?1")?;
            for (id, _) in &export_entries {
                stmt.execute(params![id])?;
            }
        }
        tx.commit()?;

        tracing::debug!(written = snapshot.len(), path = %target.display(), "exported mirror");
        Ok(ExportReport {
            written: snapshot.len(),
            unchanged: 0,
            skipped: false,
        })
    }
}

fn write_atomically(target: &Path, bytes: &[u8], mode: u32) -> Result<(), StoreError> {
    let dir = target.parent().ok_or_else(|| StoreError::PathUnsafe {
        path: target.to_path_buf(),
        reason: "targets a platform root",
    })?;
    std::fs::create_dir_all(dir)?;

    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "mirror".to_string());
    let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let result = (|| -> Result<(), StoreError> {
        let mut options = std::fs::OpenOptions::new();
        options.create(true).write(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt as _;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(&tmp_path)?;
        let mut writer = std::io::BufWriter::new(file);
        writer.write_all(bytes)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        std::fs::rename(&tmp_path, target)?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

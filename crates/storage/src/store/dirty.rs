#![forbid(unsafe_code)]
//! Per-entity change tracking for incremental export.

use super::{SqliteStore, StoreError};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

/// Upsert a dirty mark. The `SELECT` guard keeps external sentinels and
/// rows removed in the same transaction out of the table.
pub(crate) fn mark_dirty_tx(
    tx: &Transaction<'_>,
    issue_id: &str,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT OR REPLACE INTO dirty_issues (issue_id, marked_at_ms)
         SELECT id, ?2 FROM issues WHERE id = ?1",
        params![issue_id, now_ms],
    )?;
    Ok(())
}

pub(crate) fn set_export_hashes_tx(
    conn: &Connection,
    entries: &[(String, String)],
    now_ms: i64,
) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(
        "INSERT INTO export_hashes (issue_id, content_hash, exported_at_ms)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(issue_id) DO UPDATE SET
           content_hash = excluded.content_hash,
           exported_at_ms = excluded.exported_at_ms",
    )?;
    for (issue_id, content_hash) in entries {
        stmt.execute(params![issue_id, content_hash, now_ms])?;
    }
    Ok(())
}

pub(crate) fn clear_all_export_hashes_tx(conn: &Connection) -> Result<usize, StoreError> {
    Ok(conn.execute("DELETE FROM export_hashes", [])?)
}

impl SqliteStore {
    /// Dirty IDs in FIFO order of marking.
    pub fn get_dirty_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT issue_id FROM dirty_issues ORDER BY marked_at_ms ASC, issue_id ASC",
        )?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn clear_dirty(&mut self, issue_ids: &[String]) -> Result<usize, StoreError> {
        let mut cleared = 0;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare("DELETE FROM dirty_issues WHERE issue_id = ?1")?;
            for id in issue_ids {
                cleared += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(cleared)
    }

    pub fn clear_all_dirty(&mut self) -> Result<usize, StoreError> {
        Ok(self.conn.execute("DELETE FROM dirty_issues", [])?)
    }

    pub fn get_export_hash(&self, issue_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT content_hash FROM export_hashes WHERE issue_id = ?1",
                params![issue_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn has_been_exported(&self, issue_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM export_hashes WHERE issue_id = ?1")?
            .exists(params![issue_id])?)
    }

    pub fn clear_all_export_hashes(&mut self) -> Result<usize, StoreError> {
        clear_all_export_hashes_tx(&self.conn)
    }
}

#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError};
use braid_core::model::{reject_reserved_label, validate_label, EventType};
use rusqlite::params;

impl SqliteStore {
    /// Idempotent add; returns true when the label was newly attached.
    /// Writes into the reserved `provides:` namespace are rejected here and
    /// belong to a dedicated capability operation.
    pub fn add_label(&mut self, issue_id: &str, label: &str, actor: &str) -> Result<bool, StoreError> {
        validate_label(label)?;
        reject_reserved_label(label)?;
        let issue_id = issue_id.to_string();
        let label = label.to_string();
        self.mutate(actor, move |tx, ctx| {
            let exists = tx
                .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                .exists(params![issue_id])?;
            if !exists {
                return Err(StoreError::NotFound {
                    id: issue_id.clone(),
                });
            }
            let rows = tx.execute(
                "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
                params![issue_id, label],
            )?;
            if rows > 0 {
                super::issues::refresh_content_hash_tx(tx, &issue_id)?;
                ctx.record_change(
                    EventType::LabelAdded,
                    &issue_id,
                    None,
                    Some(label.clone()),
                    Some(format!("Added label {label}")),
                );
                ctx.mark_dirty(&issue_id);
            }
            Ok(rows > 0)
        })
    }

    /// Idempotent remove; returns true when a label was actually detached.
    pub fn remove_label(
        &mut self,
        issue_id: &str,
        label: &str,
        actor: &str,
    ) -> Result<bool, StoreError> {
        let issue_id = issue_id.to_string();
        let label = label.to_string();
        self.mutate(actor, move |tx, ctx| {
            let rows = tx.execute(
                "DELETE FROM labels WHERE issue_id = ?1 AND label = ?2",
                params![issue_id, label],
            )?;
            if rows > 0 {
                super::issues::refresh_content_hash_tx(tx, &issue_id)?;
                ctx.record_change(
                    EventType::LabelRemoved,
                    &issue_id,
                    Some(label.clone()),
                    None,
                    Some(format!("Removed label {label}")),
                );
                ctx.mark_dirty(&issue_id);
            }
            Ok(rows > 0)
        })
    }

    pub fn get_labels(&self, issue_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
        let labels = stmt
            .query_map(params![issue_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(labels)
    }

    /// Distinct labels with attachment counts, most used first.
    pub fn get_label_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT label, count(*) FROM labels
             GROUP BY label ORDER BY count(*) DESC, label ASC",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

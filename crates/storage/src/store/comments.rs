#![forbid(unsafe_code)]

use super::{SqliteStore, StoreError};
use braid_core::model::{Comment, EventType};
use braid_core::timefmt::now_ms;
use rusqlite::params;

impl SqliteStore {
    /// Append a comment. Comments are append-only; deduplication happens
    /// only on import, never here.
    pub fn add_comment(
        &mut self,
        issue_id: &str,
        author: &str,
        text: &str,
        actor: &str,
    ) -> Result<Comment, StoreError> {
        if author.trim().is_empty() {
            return Err(StoreError::Validation("comment author is required".to_string()));
        }
        if text.is_empty() {
            return Err(StoreError::Validation("comment text is required".to_string()));
        }

        let issue_id = issue_id.to_string();
        let author = author.to_string();
        let text = text.to_string();
        let now = now_ms();
        self.mutate(actor, move |tx, ctx| {
            let exists = tx
                .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                .exists(params![issue_id])?;
            if !exists {
                return Err(StoreError::NotFound {
                    id: issue_id.clone(),
                });
            }
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![issue_id, author, text, now],
            )?;
            let id = tx.last_insert_rowid();
            ctx.record_event(EventType::CommentAdded, &issue_id, None);
            ctx.mark_dirty(&issue_id);
            Ok(Comment {
                id,
                issue_id: issue_id.clone(),
                author: author.clone(),
                text: text.clone(),
                created_at: now,
            })
        })
    }

    /// Comments for an issue, oldest first.
    pub fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, author, text, created_at_ms
             FROM comments WHERE issue_id = ?1
             ORDER BY created_at_ms ASC, id ASC",
        )?;
        let comments = stmt
            .query_map(params![issue_id], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    author: row.get(2)?,
                    text: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(comments)
    }
}

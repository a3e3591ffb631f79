#![forbid(unsafe_code)]

use super::{PendingEvent, SqliteStore, StoreError};
use braid_core::model::{Event, EventType};
use rusqlite::{params, Row, Transaction};

pub(crate) fn insert_event_tx(
    tx: &Transaction<'_>,
    event: &PendingEvent,
    now_ms: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.issue_id,
            event.event_type.as_str(),
            event.actor,
            event.old_value,
            event.new_value,
            event.comment,
            now_ms
        ],
    )?;
    Ok(())
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: EventType::parse(&row.get::<_, String>(2)?),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl SqliteStore {
    /// Events for one issue, newest first. `limit = 0` means unlimited.
    pub fn get_events(&self, issue_id: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        let mut sql = String::from(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at_ms
             FROM events WHERE issue_id = ?1
             ORDER BY created_at_ms DESC, id DESC",
        );
        if limit > 0 {
            use std::fmt::Write as _;
            let _ = write!(sql, " LIMIT {limit}");
        }
        let mut stmt = self.conn.prepare(&sql)?;
        let events = stmt
            .query_map(params![issue_id], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }

    /// All events strictly after `ts_ms`, oldest first.
    pub fn get_events_after(&self, ts_ms: i64) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at_ms
             FROM events WHERE created_at_ms > ?1
             ORDER BY created_at_ms ASC, id ASC",
        )?;
        let events = stmt
            .query_map(params![ts_ms], event_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(events)
    }
}

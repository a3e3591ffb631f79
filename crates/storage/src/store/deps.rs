#![forbid(unsafe_code)]
//! Dependency edges: validated writes with cycle checks, and the read
//! surface the graph engine and detail views share.

use super::{cycles, DepEdgeInput, DependencyInfo, MutationContext, SqliteStore, StoreError};
use braid_core::graph::{is_external_sentinel, ExternalSentinel};
use braid_core::model::{Dependency, DepType, EventType, Priority, Status};
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

pub(crate) fn dependency_rows(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<Dependency>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT issue_id, depends_on_id, type, created_at_ms, created_by, metadata, thread_id
         FROM dependencies WHERE issue_id = ?1 ORDER BY depends_on_id",
    )?;
    let rows = stmt
        .query_map(params![issue_id], |row| {
            Ok(Dependency {
                issue_id: row.get(0)?,
                depends_on_id: row.get(1)?,
                dep_type: DepType::parse(&row.get::<_, String>(2)?),
                created_at: row.get(3)?,
                created_by: row.get(4)?,
                metadata: row.get(5)?,
                thread_id: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Shared write path for `add_dependency` and issue creation. Validates
/// the edge, runs the cycle check for blocking types, inserts, records the
/// event and marks both internal endpoints dirty.
pub(crate) fn insert_dependency_tx(
    tx: &Transaction<'_>,
    ctx: &mut MutationContext,
    issue_id: &str,
    edge: &DepEdgeInput,
    now_ms: i64,
) -> Result<(), StoreError> {
    if issue_id == edge.depends_on_id {
        return Err(braid_core::DomainError::SelfDependency {
            id: issue_id.to_string(),
        }
        .into());
    }
    if !edge.dep_type.is_builtin() {
        return Err(StoreError::Validation(format!(
            "unknown dependency type '{}'",
            edge.dep_type
        )));
    }

    if is_external_sentinel(&edge.depends_on_id) {
        ExternalSentinel::parse(&edge.depends_on_id)?;
    } else {
        let exists = tx
            .prepare("SELECT 1 FROM issues WHERE id = ?1")?
            .exists(params![edge.depends_on_id])?;
        if !exists {
            return Err(StoreError::NotFound {
                id: edge.depends_on_id.clone(),
            });
        }
        if edge.dep_type.is_blocking() {
            if let Some(path) = cycles::blocking_path_tx(tx, &edge.depends_on_id, issue_id)? {
                return Err(StoreError::CycleDetected {
                    from: issue_id.to_string(),
                    to: edge.depends_on_id.clone(),
                    path,
                });
            }
        }
    }

    let inserted = tx.execute(
        "INSERT OR IGNORE INTO dependencies
            (issue_id, depends_on_id, type, created_at_ms, created_by, metadata, thread_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            edge.depends_on_id,
            edge.dep_type.as_str(),
            now_ms,
            ctx.actor(),
            edge.metadata,
            edge.thread_id,
        ],
    )?;
    if inserted == 0 {
        return Err(StoreError::Validation(format!(
            "{issue_id} already depends on {}",
            edge.depends_on_id
        )));
    }

    ctx.record_change(
        EventType::DependencyAdded,
        issue_id,
        None,
        Some(edge.depends_on_id.clone()),
        Some(format!(
            "Added {} dependency on {}",
            edge.dep_type, edge.depends_on_id
        )),
    );
    ctx.mark_dirty(issue_id);
    ctx.mark_dirty(&edge.depends_on_id);
    if edge.dep_type.is_blocking() {
        ctx.refresh_cache();
    }
    Ok(())
}

impl SqliteStore {
    pub fn add_dependency(
        &mut self,
        issue_id: &str,
        edge: DepEdgeInput,
        actor: &str,
    ) -> Result<(), StoreError> {
        let issue_id = issue_id.to_string();
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
            insert_dependency_tx(tx, ctx, &issue_id, &edge, now)?;
            super::issues::refresh_content_hash_tx(tx, &issue_id)?;
            Ok(())
        })
    }

    /// Returns true when an edge was actually removed.
    pub fn remove_dependency(
        &mut self,
        issue_id: &str,
        depends_on_id: &str,
        actor: &str,
    ) -> Result<bool, StoreError> {
        let issue_id = issue_id.to_string();
        let depends_on_id = depends_on_id.to_string();
        self.mutate(actor, move |tx, ctx| {
            let removed_type: Option<String> = tx
                .query_row(
                    "SELECT type FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
                    params![issue_id, depends_on_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(removed_type) = removed_type else {
                return Err(StoreError::NotFound {
                    id: format!("{issue_id} -> {depends_on_id}"),
                });
            };

            tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ?1 AND depends_on_id = ?2",
                params![issue_id, depends_on_id],
            )?;
            super::issues::refresh_content_hash_tx(tx, &issue_id)?;
            ctx.record_change(
                EventType::DependencyRemoved,
                &issue_id,
                Some(depends_on_id.clone()),
                None,
                Some(format!("Removed dependency on {depends_on_id}")),
            );
            ctx.mark_dirty(&issue_id);
            ctx.mark_dirty(&depends_on_id);
            if DepType::parse(&removed_type).is_blocking() {
                ctx.refresh_cache();
            }
            Ok(true)
        })
    }

    /// Remove every edge touching `issue_id`, both directions. Returns the
    /// count removed.
    pub fn remove_all_dependencies(
        &mut self,
        issue_id: &str,
        actor: &str,
    ) -> Result<usize, StoreError> {
        let issue_id = issue_id.to_string();
        self.mutate(actor, move |tx, ctx| {
            let affected: Vec<String> = {
                let mut stmt = tx.prepare(
                    "SELECT DISTINCT issue_id FROM dependencies WHERE depends_on_id = ?1
                     UNION
                     SELECT DISTINCT depends_on_id FROM dependencies WHERE issue_id = ?1",
                )?;
                let rows = stmt.query_map(params![issue_id], |row| row.get(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            let outgoing = tx.execute(
                "DELETE FROM dependencies WHERE issue_id = ?1",
                params![issue_id],
            )?;
            let incoming = tx.execute(
                "DELETE FROM dependencies WHERE depends_on_id = ?1",
                params![issue_id],
            )?;
            let total = outgoing + incoming;

            if total > 0 {
                super::issues::refresh_content_hash_tx(tx, &issue_id)?;
                ctx.record_event(
                    EventType::DependencyRemoved,
                    &issue_id,
                    Some(format!("Removed {total} dependency links")),
                );
                ctx.mark_dirty(&issue_id);
                for id in affected {
                    ctx.mark_dirty(&id);
                }
                ctx.refresh_cache();
            }
            Ok(total)
        })
    }

    /// IDs this issue depends on.
    pub fn get_dependencies(&self, issue_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT depends_on_id FROM dependencies WHERE issue_id = ?1")?;
        let ids = stmt
            .query_map(params![issue_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// IDs that depend on this issue.
    pub fn get_dependents(&self, issue_id: &str) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM dependencies WHERE depends_on_id = ?1")?;
        let ids = stmt
            .query_map(params![issue_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn count_dependencies(&self, issue_id: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM dependencies WHERE issue_id = ?1",
            params![issue_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn count_dependents(&self, issue_id: &str) -> Result<usize, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT count(*) FROM dependencies WHERE depends_on_id = ?1",
            params![issue_id],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Parent via the `parent-child` edge, if any.
    pub fn get_parent_id(&self, issue_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT depends_on_id FROM dependencies
                 WHERE issue_id = ?1 AND type = 'parent-child'",
                params![issue_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn get_dependencies_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<DependencyInfo>, StoreError> {
        self.edge_info(
            issue_id,
            "SELECT d.depends_on_id, i.title, i.status, i.priority, d.type
             FROM dependencies d
             LEFT JOIN issues i ON d.depends_on_id = i.id
             WHERE d.issue_id = ?1
             ORDER BY i.priority ASC, i.created_at_ms DESC",
        )
    }

    pub fn get_dependents_with_metadata(
        &self,
        issue_id: &str,
    ) -> Result<Vec<DependencyInfo>, StoreError> {
        self.edge_info(
            issue_id,
            "SELECT d.issue_id, i.title, i.status, i.priority, d.type
             FROM dependencies d
             LEFT JOIN issues i ON d.issue_id = i.id
             WHERE d.depends_on_id = ?1
             ORDER BY i.priority ASC, i.created_at_ms DESC",
        )
    }

    fn edge_info(&self, issue_id: &str, sql: &str) -> Result<Vec<DependencyInfo>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params![issue_id], |row| {
                Ok(DependencyInfo {
                    id: row.get(0)?,
                    title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    status: Status::parse(
                        &row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    ),
                    priority: Priority(
                        row.get::<_, Option<i64>>(3)?.unwrap_or(2).clamp(0, 4) as u8
                    ),
                    dep_type: DepType::parse(&row.get::<_, String>(4)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

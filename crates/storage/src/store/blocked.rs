#![forbid(unsafe_code)]
//! Blocked-work materialization and the ready-work query.
//!
//! `blocked_issues_cache` is rebuilt in two phases inside the mutating
//! transaction: direct blocks per dependency type, then transitive
//! propagation through `parent-child` edges. The ready query subtracts the
//! cache from the active, undeferred, unpinned, non-ephemeral set.

use super::issues::{issue_from_row, ISSUE_COLUMNS};
use super::{ReadyFilters, ReadySortPolicy, SqliteStore, StoreError};
use braid_core::graph::{close_reason_indicates_failure, is_external_sentinel, parse_gate, Gate};
use braid_core::model::{DepType, Issue, Status};
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;

const MAX_TRANSITIVE_DEPTH: usize = 50;

struct BlockingEdge {
    issue_id: String,
    depends_on_id: String,
    dep_type: DepType,
    metadata: Option<String>,
}

/// Rebuild the cache from scratch; returns the number of blocked issues.
pub(crate) fn rebuild_blocked_cache_tx(conn: &Connection) -> Result<usize, StoreError> {
    conn.execute("DELETE FROM blocked_issues_cache", [])?;

    let edges: Vec<BlockingEdge> = {
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, metadata FROM dependencies
             WHERE type IN ('blocks', 'parent-child', 'conditional-blocks', 'waits-for')",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BlockingEdge {
                issue_id: row.get(0)?,
                depends_on_id: row.get(1)?,
                dep_type: DepType::parse(&row.get::<_, String>(2)?),
                metadata: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let statuses: HashMap<String, (Status, Option<String>)> = {
        let mut stmt = conn.prepare("SELECT id, status, close_reason FROM issues")?;
        let mut rows = stmt.query([])?;
        let mut map = HashMap::new();
        while let Some(row) = rows.next()? {
            map.insert(
                row.get::<_, String>(0)?,
                (
                    Status::parse(&row.get::<_, String>(1)?),
                    row.get::<_, Option<String>>(2)?,
                ),
            );
        }
        map
    };

    // parent id -> children, for waits-for gates.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &edges {
        if edge.dep_type == DepType::ParentChild {
            children
                .entry(edge.depends_on_id.as_str())
                .or_default()
                .push(edge.issue_id.as_str());
        }
    }

    // Phase 1: direct blocks.
    let mut blocked: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in &edges {
        if is_external_sentinel(&edge.depends_on_id) {
            continue;
        }
        let target = statuses.get(&edge.depends_on_id);
        let holds = match edge.dep_type {
            DepType::Blocks => match target {
                Some((status, _)) => !status.is_terminal(),
                None => true,
            },
            DepType::ConditionalBlocks => match target {
                Some((Status::Tombstone, _)) => false,
                Some((Status::Closed, reason)) => {
                    close_reason_indicates_failure(reason.as_deref().unwrap_or(""))
                }
                Some(_) => true,
                None => true,
            },
            DepType::WaitsFor => match target {
                Some((Status::Tombstone, _)) => false,
                Some(_) => {
                    let gate = parse_gate(edge.metadata.as_deref());
                    let kids = children
                        .get(edge.depends_on_id.as_str())
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    let closed = |id: &&str| {
                        statuses
                            .get(*id)
                            .map(|(status, _)| status.is_terminal())
                            .unwrap_or(false)
                    };
                    match gate {
                        Gate::AllChildren => !kids.iter().all(closed),
                        Gate::AnyChildren => !kids.iter().any(closed),
                    }
                }
                None => true,
            },
            // parent-child blocks only transitively (phase 2).
            _ => false,
        };
        if holds {
            blocked
                .entry(edge.issue_id.clone())
                .or_default()
                .push(edge.depends_on_id.clone());
        }
    }

    // Phase 2: a blocked parent blocks its children, to a bounded depth.
    for depth in 0.. {
        if depth >= MAX_TRANSITIVE_DEPTH {
            tracing::warn!(
                depth = MAX_TRANSITIVE_DEPTH,
                "transitive blocked propagation hit depth limit"
            );
            break;
        }
        let mut newly: Vec<(String, String)> = Vec::new();
        for edge in &edges {
            if edge.dep_type == DepType::ParentChild
                && blocked.contains_key(&edge.depends_on_id)
                && !blocked.contains_key(&edge.issue_id)
            {
                newly.push((edge.issue_id.clone(), edge.depends_on_id.clone()));
            }
        }
        if newly.is_empty() {
            break;
        }
        for (child, parent) in newly {
            blocked
                .entry(child)
                .or_default()
                .push(format!("{parent}:parent-blocked"));
        }
    }

    let now = now_ms();
    let count = blocked.len();
    {
        let mut stmt = conn.prepare(
            "INSERT INTO blocked_issues_cache (issue_id, blocked_by, blocked_at_ms)
             VALUES (?1, ?2, ?3)",
        )?;
        for (issue_id, blockers) in &blocked {
            let blocked_by =
                serde_json::to_string(blockers).unwrap_or_else(|_| "[]".to_string());
            stmt.execute(params![issue_id, blocked_by, now])?;
        }
    }

    tracing::debug!(blocked_count = count, "rebuilt blocked issues cache");
    Ok(count)
}

impl SqliteStore {
    /// Force a cache rebuild outside a mutating operation.
    pub fn rebuild_blocked_cache(&mut self) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        let count = rebuild_blocked_cache_tx(&tx)?;
        tx.commit()?;
        Ok(count)
    }

    pub fn get_blocked_ids(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT issue_id FROM blocked_issues_cache")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn is_blocked(&self, issue_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM blocked_issues_cache WHERE issue_id = ?1")?
            .exists(params![issue_id])?)
    }

    /// Active blocked issues with the IDs holding them.
    pub fn get_blocked_issues(&self) -> Result<Vec<(Issue, Vec<String>)>, StoreError> {
        let sql = format!(
            "SELECT {ISSUE_COLUMNS}, bc.blocked_by
             FROM issues JOIN blocked_issues_cache bc ON issues.id = bc.issue_id
             WHERE issues.status IN ('open', 'in_progress')
             ORDER BY issues.priority ASC, issues.created_at_ms ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let issue = issue_from_row(row)?;
                let blocked_by: String = row.get(30)?;
                Ok((issue, blocked_by))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .map(|(issue, raw)| {
                let blockers = serde_json::from_str(&raw).unwrap_or_default();
                (issue, blockers)
            })
            .collect())
    }

    /// Ready work: active, unblocked, undeferred, unpinned, non-ephemeral,
    /// non-template issues under the configured sort policy.
    pub fn ready_work(
        &self,
        filters: &ReadyFilters,
        sort: Option<ReadySortPolicy>,
    ) -> Result<Vec<Issue>, StoreError> {
        let sort = match sort {
            Some(policy) => policy,
            None => self.ready_sort_policy()?,
        };
        let blocked = self.get_blocked_ids()?;

        let mut sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues
             WHERE status IN ('open', 'in_progress')
               AND (defer_until_ms IS NULL OR defer_until_ms <= ?1)
               AND pinned = 0
               AND ephemeral = 0
               AND is_template = 0"
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(now_ms())];

        if let Some(types) = &filters.types {
            if !types.is_empty() {
                let placeholders = vec!["?"; types.len()].join(",");
                let _ = write!(sql, " AND issue_type IN ({placeholders})");
                for issue_type in types {
                    params.push(Box::new(issue_type.as_str().to_string()));
                }
            }
        }
        if let Some(priorities) = &filters.priorities {
            if !priorities.is_empty() {
                let placeholders = vec!["?"; priorities.len()].join(",");
                let _ = write!(sql, " AND priority IN ({placeholders})");
                for priority in priorities {
                    params.push(Box::new(i64::from(priority.0)));
                }
            }
        }
        if let Some(assignee) = &filters.assignee {
            sql.push_str(" AND assignee = ?");
            params.push(Box::new(assignee.clone()));
        }
        if filters.unassigned {
            sql.push_str(" AND assignee IS NULL");
        }

        match sort {
            ReadySortPolicy::Hybrid => {
                sql.push_str(
                    " ORDER BY CASE WHEN priority <= 1 THEN 0 ELSE 1 END, created_at_ms ASC",
                );
            }
            ReadySortPolicy::Priority => {
                sql.push_str(" ORDER BY priority ASC, created_at_ms ASC");
            }
            ReadySortPolicy::Oldest => {
                sql.push_str(" ORDER BY created_at_ms ASC");
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let mut issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        issues.retain(|issue| !blocked.contains(&issue.id));

        if let Some(limit) = filters.limit {
            if limit > 0 && issues.len() > limit {
                issues.truncate(limit);
            }
        }
        Ok(issues)
    }
}

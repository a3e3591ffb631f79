#![forbid(unsafe_code)]
//! Cycle detection for the blocking-edge family.
//!
//! A prospective edge `A -> B` is rejected when `A` is reachable from `B`
//! through existing blocking edges. Traversal is bounded and tracks visited
//! IDs as whole tokens, so `bd-1` never matches inside `bd-10`.

use super::StoreError;
use braid_core::graph::is_external_sentinel;
use braid_core::model::{DepType, Status};
use rusqlite::{params, Connection};
use std::collections::HashSet;

const MAX_CYCLE_DEPTH: usize = 100;

const BLOCKING_TYPES_SQL: &str = "('blocks', 'parent-child', 'conditional-blocks', 'waits-for')";

/// Depth-first search from `start` along blocking edges; returns the path
/// `start -> .. -> target` when `target` is reachable.
pub(crate) fn blocking_path_tx(
    conn: &Connection,
    start: &str,
    target: &str,
) -> Result<Option<Vec<String>>, StoreError> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut path: Vec<String> = vec![start.to_string()];
    if start == target {
        return Ok(Some(path));
    }
    visited.insert(start.to_string());
    if dfs(conn, start, target, &mut visited, &mut path, 0)? {
        return Ok(Some(path));
    }
    Ok(None)
}

fn dfs(
    conn: &Connection,
    current: &str,
    target: &str,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
    depth: usize,
) -> Result<bool, StoreError> {
    if depth >= MAX_CYCLE_DEPTH {
        tracing::warn!(depth = MAX_CYCLE_DEPTH, "cycle search hit depth limit");
        return Ok(false);
    }

    let next: Vec<String> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT depends_on_id FROM dependencies
             WHERE issue_id = ?1 AND type IN {BLOCKING_TYPES_SQL}"
        ))?;
        let rows = stmt.query_map(params![current], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    for candidate in next {
        if is_external_sentinel(&candidate) {
            continue;
        }
        if candidate == target {
            path.push(candidate);
            return Ok(true);
        }
        if !visited.insert(candidate.clone()) {
            continue;
        }
        path.push(candidate.clone());
        if dfs(conn, &candidate, target, visited, path, depth + 1)? {
            return Ok(true);
        }
        path.pop();
    }
    Ok(false)
}

/// Direct blockers of `issue_id` that are still open: blocking-type edges
/// whose target is neither terminal nor an external sentinel. Used by the
/// close guard.
pub(crate) fn open_blockers_tx(
    conn: &Connection,
    issue_id: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT d.depends_on_id, d.type, i.status
         FROM dependencies d
         LEFT JOIN issues i ON d.depends_on_id = i.id
         WHERE d.issue_id = ?1 AND d.type IN {BLOCKING_TYPES_SQL}"
    ))?;
    let mut rows = stmt.query(params![issue_id])?;
    let mut blockers = Vec::new();
    while let Some(row) = rows.next()? {
        let depends_on: String = row.get(0)?;
        let dep_type = DepType::parse(&row.get::<_, String>(1)?);
        if is_external_sentinel(&depends_on) || dep_type == DepType::ParentChild {
            continue;
        }
        let status = row
            .get::<_, Option<String>>(2)?
            .map(|s| Status::parse(&s));
        let open = match status {
            Some(status) => !status.is_terminal(),
            // Dangling internal target: conservatively still a blocker.
            None => true,
        };
        if open {
            blockers.push(depends_on);
        }
    }
    Ok(blockers)
}

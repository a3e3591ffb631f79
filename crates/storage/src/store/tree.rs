#![forbid(unsafe_code)]
//! Dependency-tree traversal.
//!
//! Returns a flat, deterministically ordered node list. `down` follows
//! `depends_on_id`, `up` follows reverse edges, `both` concatenates. By
//! default diamonds dedupe to their shallowest occurrence; all-paths mode
//! keeps re-visits while cycle-guarding along the current path.

use super::issues::get_issue_any_tx;
use super::{ExternalResolver, SqliteStore, StoreError, TreeDirection, TreeNode, TreeOptions};
use braid_core::graph::{is_external_sentinel, ExternalSentinel};
use braid_core::model::{Priority, Status};
use rusqlite::params;
use std::collections::{HashMap, HashSet, VecDeque};

const DEFAULT_TREE_DEPTH: usize = 50;

impl SqliteStore {
    pub fn dependency_tree(
        &self,
        root: &str,
        options: &TreeOptions,
        resolver: &dyn ExternalResolver,
    ) -> Result<Vec<TreeNode>, StoreError> {
        if get_issue_any_tx(&self.conn, root)?.is_none() {
            return Err(StoreError::NotFound {
                id: root.to_string(),
            });
        }

        let max_depth = options.max_depth.unwrap_or(DEFAULT_TREE_DEPTH);
        let mut nodes = match options.direction {
            TreeDirection::Down => self.walk(root, true, max_depth, options.all_paths, resolver)?,
            TreeDirection::Up => self.walk(root, false, max_depth, options.all_paths, resolver)?,
            TreeDirection::Both => {
                let mut down = self.walk(root, true, max_depth, options.all_paths, resolver)?;
                let up = self.walk(root, false, max_depth, options.all_paths, resolver)?;
                // Root is already present from the downward pass.
                down.extend(up.into_iter().filter(|node| node.depth > 0));
                down
            }
        };

        nodes.sort_by(|a, b| {
            a.depth
                .cmp(&b.depth)
                .then(a.priority.cmp(&b.priority))
                .then(a.id.cmp(&b.id))
        });
        Ok(nodes)
    }

    fn walk(
        &self,
        root: &str,
        down: bool,
        max_depth: usize,
        all_paths: bool,
        resolver: &dyn ExternalResolver,
    ) -> Result<Vec<TreeNode>, StoreError> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut issue_cache: HashMap<String, (String, Status, Priority)> = HashMap::new();

        // (id, depth, parent, ancestors-on-path for all_paths cycle guard)
        let mut queue: VecDeque<(String, usize, Option<String>, Vec<String>)> = VecDeque::new();
        queue.push_back((root.to_string(), 0, None, vec![root.to_string()]));
        seen.insert(root.to_string());

        while let Some((id, depth, parent_id, path)) = queue.pop_front() {
            if is_external_sentinel(&id) {
                // Synthesized leaf in down mode; resolution is pull-only.
                let status = ExternalSentinel::parse(&id)
                    .ok()
                    .and_then(|sentinel| resolver.resolve(&sentinel))
                    .unwrap_or(Status::Open);
                out.push(TreeNode {
                    id: id.clone(),
                    title: id.clone(),
                    status,
                    priority: Priority::default(),
                    depth,
                    parent_id,
                    truncated: false,
                    external: true,
                });
                continue;
            }

            let (title, status, priority) = match issue_cache.get(&id) {
                Some(entry) => entry.clone(),
                None => {
                    let entry = match get_issue_any_tx(&self.conn, &id)? {
                        Some(issue) => (issue.title, issue.status, issue.priority),
                        None => (id.clone(), Status::Open, Priority::default()),
                    };
                    issue_cache.insert(id.clone(), entry.clone());
                    entry
                }
            };

            let next = self.neighbors(&id, down)?;
            let truncated = depth >= max_depth && !next.is_empty();
            out.push(TreeNode {
                id: id.clone(),
                title,
                status,
                priority,
                depth,
                parent_id,
                truncated,
                external: false,
            });

            if depth >= max_depth {
                continue;
            }
            for candidate in next {
                // Sentinels only materialize when following depends_on_id.
                if is_external_sentinel(&candidate) && !down {
                    continue;
                }
                if all_paths {
                    if path.iter().any(|ancestor| ancestor == &candidate) {
                        continue;
                    }
                    let mut next_path = path.clone();
                    next_path.push(candidate.clone());
                    queue.push_back((candidate, depth + 1, Some(id.clone()), next_path));
                } else if seen.insert(candidate.clone()) {
                    queue.push_back((candidate, depth + 1, Some(id.clone()), Vec::new()));
                }
            }
        }
        Ok(out)
    }

    fn neighbors(&self, id: &str, down: bool) -> Result<Vec<String>, StoreError> {
        let sql = if down {
            "SELECT depends_on_id FROM dependencies WHERE issue_id = ?1 ORDER BY depends_on_id"
        } else {
            "SELECT issue_id FROM dependencies WHERE depends_on_id = ?1 ORDER BY issue_id"
        };
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }
}

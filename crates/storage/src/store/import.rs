#![forbid(unsafe_code)]
//! Import of the textual mirror: strict parse, then a 4-phase
//! match-and-merge per incoming record.
//!
//! Phase 0 matches by external ref, 1a/1b by content hash, 2 by ID with
//! last-writer-wins, 3 creates. Tombstones are authoritative and never
//! resurrected; a caller-supplied timestamp map protects locally exported
//! rows from stale echoes. Any parse failure aborts the whole import with
//! no side effects; all writes run in a single transaction.

use super::issues::{
    get_issue_any_tx, insert_issue_tx, load_relations, update_issue_row_tx,
};
use super::lock::SyncLock;
use super::support::immediate_tx;
use super::{
    dirty, meta, paths, ImportOptions, ImportReport, OrphanHandling, SqliteStore, StoreError,
};
use braid_core::hash::content_hash;
use braid_core::idgen::{id_depth, parent_of, split_id};
use braid_core::model::{DepType, Issue, Status};
use braid_core::timefmt::now_ms;
use rusqlite::{params, OptionalExtension, Transaction};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const MERGE_MARKERS: &[&str] = &["<<<<<<<", "=======", ">>>>>>>"];

impl SqliteStore {
    /// Import the workspace's canonical mirror.
    pub fn import(&mut self, options: &ImportOptions) -> Result<ImportReport, StoreError> {
        let path = self.mirror_path();
        self.import_from(&path, options)
    }

    pub fn import_from(
        &mut self,
        path: &Path,
        options: &ImportOptions,
    ) -> Result<ImportReport, StoreError> {
        let target = paths::ensure_safe_mirror_path(&self.workspace_dir, path)?;
        let _lock = SyncLock::acquire(&self.workspace_dir)?;

        let bytes = std::fs::read(&target)?;
        let contents = String::from_utf8(bytes).map_err(|_| StoreError::CorruptInput {
            path: target.clone(),
            line: None,
            reason: "mirror is not valid UTF-8".to_string(),
        })?;

        let mut records = parse_mirror(&target, &contents)?;

        let mut report = ImportReport::default();
        self.check_external_ref_duplicates(&target, &mut records, options)?;
        self.apply_prefix_policy(&mut records, options, &mut report)?;

        let file_hash = braid_core::hash::hex(&Sha256::digest(contents.as_bytes()));

        let protect = &options.protect_ids;
        let now = now_ms();

        let tx = immediate_tx(&mut self.conn)?;
        dirty::clear_all_export_hashes_tx(&tx)?;

        let mut creations: Vec<Issue> = Vec::new();
        for record in records {
            resolve_record_tx(&tx, record, protect, &mut report, &mut creations)?;
        }
        apply_creations_tx(
            &tx,
            creations,
            options.orphan_handling,
            now,
            &mut report,
        )?;

        super::blocked::rebuild_blocked_cache_tx(&tx)?;
        meta::set_metadata_tx(&tx, meta::META_JSONL_CONTENT_HASH, &file_hash)?;
        meta::set_metadata_tx(&tx, meta::META_JSONL_FILE_HASH, &file_hash)?;
        meta::set_metadata_tx(&tx, meta::META_LAST_IMPORT_TIME, &now.to_string())?;
        tx.commit()?;

        tracing::debug!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            "imported mirror"
        );
        Ok(report)
    }

    fn check_external_ref_duplicates(
        &self,
        path: &Path,
        records: &mut [Issue],
        options: &ImportOptions,
    ) -> Result<(), StoreError> {
        let mut seen: HashSet<String> = HashSet::new();
        for record in records.iter_mut() {
            let Some(ext) = record.external_ref.clone().filter(|e| !e.is_empty()) else {
                continue;
            };
            if !seen.insert(ext.clone()) {
                if options.dedupe_external_refs {
                    record.external_ref = None;
                } else {
                    return Err(StoreError::Conflict(format!(
                        "duplicate external_ref '{ext}' in {}",
                        path.display()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Single-prefix policy: mismatched records are rejected, silently
    /// dropped when they are all tombstone noise, or renamed into the
    /// workspace prefix on request (rewriting textual references too).
    fn apply_prefix_policy(
        &self,
        records: &mut Vec<Issue>,
        options: &ImportOptions,
        report: &mut ImportReport,
    ) -> Result<(), StoreError> {
        let workspace_prefix = self.issue_prefix()?;
        let mut allowed: HashSet<&str> = HashSet::new();
        allowed.insert(workspace_prefix.as_str());
        for prefix in &self.engine.allowed_prefixes {
            allowed.insert(prefix.as_str());
        }

        let mismatched: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| {
                !matches!(split_id(&record.id), Some((prefix, _)) if allowed.contains(prefix))
            })
            .map(|(index, _)| index)
            .collect();
        if mismatched.is_empty() {
            return Ok(());
        }

        if !options.rename_on_import {
            if mismatched
                .iter()
                .all(|&index| records[index].status == Status::Tombstone)
            {
                // Foreign tombstones are noise, not errors.
                for index in mismatched.into_iter().rev() {
                    records.remove(index);
                    report.skipped += 1;
                }
                return Ok(());
            }
            let offending = &records[mismatched[0]];
            return Err(StoreError::PrefixMismatch {
                id: offending.id.clone(),
                allowed: allowed.iter().map(|s| s.to_string()).collect(),
            });
        }

        let mut rename: HashMap<String, String> = HashMap::new();
        for &index in &mismatched {
            let old_id = records[index].id.clone();
            let hash = split_id(&old_id)
                .map(|(_, hash)| hash.to_string())
                .unwrap_or_else(|| old_id.clone());
            rename.insert(old_id, format!("{workspace_prefix}-{hash}"));
        }

        for record in records.iter_mut() {
            let renamed = rename.contains_key(&record.id);
            if let Some(new_id) = rename.get(&record.id) {
                record.id = new_id.clone();
            }
            rewrite_record_references(record, &rename);
            if renamed {
                report.renamed += 1;
            }
        }
        Ok(())
    }
}

fn parse_mirror(path: &Path, contents: &str) -> Result<Vec<Issue>, StoreError> {
    // Merge markers abort before any parsing.
    for (index, line) in contents.lines().enumerate() {
        if MERGE_MARKERS.iter().any(|marker| line.starts_with(marker)) {
            return Err(StoreError::CorruptInput {
                path: path.to_path_buf(),
                line: Some(index as u64 + 1),
                reason: "unresolved merge markers".to_string(),
            });
        }
    }

    let mut records = Vec::new();
    let mut ids: HashSet<String> = HashSet::new();
    for (index, line) in contents.lines().enumerate() {
        let line_no = index as u64 + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: Issue =
            serde_json::from_str(trimmed).map_err(|err| StoreError::CorruptInput {
                path: path.to_path_buf(),
                line: Some(line_no),
                reason: err.to_string(),
            })?;

        let corrupt = |reason: String| StoreError::CorruptInput {
            path: path.to_path_buf(),
            line: Some(line_no),
            reason,
        };
        if record.id.is_empty() {
            return Err(corrupt("record has no id".to_string()));
        }
        if !ids.insert(record.id.clone()) {
            return Err(corrupt(format!("duplicate id {}", record.id)));
        }
        let mut validated = record;
        validated
            .normalize_and_validate()
            .map_err(|err| corrupt(err.to_string()))?;
        // Normalize the closed boundary rather than bouncing the batch on
        // foreign writers that drop one side of the pair.
        match validated.status {
            Status::Tombstone => {
                if validated.deleted_at.is_none() {
                    validated.deleted_at = Some(validated.updated_at);
                }
            }
            Status::Closed => {
                if validated.closed_at.is_none() {
                    validated.closed_at = Some(validated.updated_at);
                }
            }
            _ => validated.closed_at = None,
        }
        records.push(validated);
    }
    Ok(records)
}

fn resolve_record_tx(
    tx: &Transaction<'_>,
    record: Issue,
    protect: &HashMap<String, i64>,
    report: &mut ImportReport,
    creations: &mut Vec<Issue>,
) -> Result<(), StoreError> {
    let incoming_hash = content_hash(&record);
    let existing_by_id = get_issue_any_tx(tx, &record.id)?;

    // Tombstones are authoritative for the rest of this clone's lifetime.
    if matches!(&existing_by_id, Some(existing) if existing.status == Status::Tombstone) {
        report.tombstone_skipped += 1;
        return Ok(());
    }

    // Timestamp-aware local protection against round-trip echoes.
    if let Some(protect_since) = protect.get(&record.id) {
        if record.updated_at <= *protect_since {
            report.protected_skipped += 1;
            return Ok(());
        }
    }

    // Phase 0: external-ref match.
    if let Some(ext) = record.external_ref.clone().filter(|e| !e.is_empty()) {
        let matched: Option<String> = tx
            .query_row(
                "SELECT id FROM issues WHERE external_ref = ?1 AND status <> 'tombstone'",
                params![ext],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing_id) = matched {
            let mut existing =
                get_issue_any_tx(tx, &existing_id)?.ok_or(StoreError::NotFound {
                    id: existing_id.clone(),
                })?;
            load_relations(tx, &mut existing)?;
            if record.updated_at > existing.updated_at {
                apply_incoming_tx(tx, &existing_id, record, Some(&existing))?;
                report.updated += 1;
            } else {
                report.skipped += 1;
            }
            return Ok(());
        }
    }

    if let Some(mut existing) = existing_by_id {
        load_relations(tx, &mut existing)?;
        // Phase 1a: identical content under the same ID.
        if content_hash(&existing) == incoming_hash {
            report.skipped += 1;
            return Ok(());
        }
        // Phase 2: same ID, differing content; last writer wins.
        if record.updated_at > existing.updated_at {
            apply_incoming_tx(tx, &existing.id.clone(), record, None)?;
            report.updated += 1;
        } else {
            report.skipped += 1;
        }
        return Ok(());
    }

    // Phase 1b: identical content under a different ID.
    let twin: Option<String> = tx
        .query_row(
            "SELECT id FROM issues WHERE content_hash = ?1 AND id <> ?2",
            params![incoming_hash, record.id],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(twin_id) = twin {
        let same_prefix = match (split_id(&twin_id), split_id(&record.id)) {
            (Some((a, _)), Some((b, _))) => a == b,
            _ => false,
        };
        if same_prefix {
            rename_issue_tx(tx, &twin_id, &record.id)?;
            report.renamed += 1;
        } else {
            // Cross-project duplicate; leave both worlds alone.
            report.skipped += 1;
        }
        return Ok(());
    }

    // Phase 3: brand new.
    creations.push(record);
    Ok(())
}

/// Replace an issue and its owned relations with the incoming record.
/// `phase0_existing` carries the matched row for external-ref merges, where
/// an absent incoming `pinned` must not clear a true stored value.
fn apply_incoming_tx(
    tx: &Transaction<'_>,
    target_id: &str,
    mut record: Issue,
    phase0_existing: Option<&Issue>,
) -> Result<(), StoreError> {
    if let Some(existing) = phase0_existing {
        record.pinned = record.pinned || existing.pinned;
    }
    record.id = target_id.to_string();
    record.content_hash = Some(content_hash(&record));

    update_issue_row_tx(tx, &record)?;

    tx.execute("DELETE FROM labels WHERE issue_id = ?1", params![target_id])?;
    tx.execute(
        "DELETE FROM dependencies WHERE issue_id = ?1",
        params![target_id],
    )?;
    insert_relations_tx(tx, &record)?;
    Ok(())
}

fn create_incoming_tx(tx: &Transaction<'_>, mut record: Issue) -> Result<(), StoreError> {
    record.content_hash = Some(content_hash(&record));
    insert_issue_tx(tx, &record)?;
    insert_relations_tx(tx, &record)?;
    Ok(())
}

fn insert_relations_tx(tx: &Transaction<'_>, record: &Issue) -> Result<(), StoreError> {
    for label in &record.labels {
        tx.execute(
            "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
            params![record.id, label],
        )?;
    }
    for dep in &record.dependencies {
        tx.execute(
            "INSERT OR IGNORE INTO dependencies
                (issue_id, depends_on_id, type, created_at_ms, created_by, metadata, thread_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                dep.depends_on_id,
                dep.dep_type.as_str(),
                dep.created_at,
                dep.created_by,
                dep.metadata,
                dep.thread_id,
            ],
        )?;
    }
    // Comments dedupe on import only; adds elsewhere are append-only.
    for comment in &record.comments {
        let exists = tx
            .prepare(
                "SELECT 1 FROM comments
                 WHERE issue_id = ?1 AND author = ?2 AND text = ?3 AND created_at_ms = ?4",
            )?
            .exists(params![record.id, comment.author, comment.text, comment.created_at])?;
        if !exists {
            tx.execute(
                "INSERT INTO comments (issue_id, author, text, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4)",
                params![record.id, comment.author, comment.text, comment.created_at],
            )?;
        }
    }
    Ok(())
}

/// Parents before children, then orphan policy, then insertion.
fn apply_creations_tx(
    tx: &Transaction<'_>,
    mut creations: Vec<Issue>,
    orphan_handling: OrphanHandling,
    now_ms: i64,
    report: &mut ImportReport,
) -> Result<(), StoreError> {
    creations.sort_by(|a, b| id_depth(&a.id).cmp(&id_depth(&b.id)).then(a.id.cmp(&b.id)));

    let batch_ids: HashSet<String> = creations.iter().map(|issue| issue.id.clone()).collect();
    let mut dropped: HashSet<String> = HashSet::new();

    for record in &creations {
        for dep in &record.dependencies {
            if dep.dep_type != DepType::ParentChild {
                continue;
            }
            let parent = &dep.depends_on_id;
            let present = batch_ids.contains(parent)
                || tx
                    .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                    .exists(params![parent])?;
            if present {
                continue;
            }
            match orphan_handling {
                OrphanHandling::Strict => {
                    return Err(StoreError::Conflict(format!(
                        "{} references missing parent {parent}",
                        record.id
                    )));
                }
                OrphanHandling::Skip => {
                    tracing::warn!(child = %record.id, parent = %parent, "dropping orphaned child");
                    dropped.insert(record.id.clone());
                    report.orphans_dropped += 1;
                }
                OrphanHandling::Allow => {}
                OrphanHandling::Resurrect => {
                    resurrect_ancestors_tx(tx, parent, now_ms, report)?;
                }
            }
        }
    }

    for record in creations {
        if dropped.contains(&record.id) {
            continue;
        }
        create_incoming_tx(tx, record)?;
        report.created += 1;
    }
    Ok(())
}

/// Create placeholder closed issues for a missing parent and its missing
/// ancestors (last known state is unavailable without the textual history,
/// so the placeholder records only the identity).
fn resurrect_ancestors_tx(
    tx: &Transaction<'_>,
    id: &str,
    now_ms: i64,
    report: &mut ImportReport,
) -> Result<(), StoreError> {
    if let Some(parent) = parent_of(id) {
        let parent_present = tx
            .prepare("SELECT 1 FROM issues WHERE id = ?1")?
            .exists(params![parent])?;
        if !parent_present {
            resurrect_ancestors_tx(tx, parent, now_ms, report)?;
        }
    }

    let present = tx
        .prepare("SELECT 1 FROM issues WHERE id = ?1")?
        .exists(params![id])?;
    if present {
        return Ok(());
    }

    let mut placeholder = Issue::new(id, format!("(resurrected) {id}"), now_ms);
    placeholder.status = Status::Closed;
    placeholder.closed_at = Some(now_ms);
    placeholder.close_reason = Some("resurrected placeholder".to_string());
    placeholder.content_hash = Some(content_hash(&placeholder));
    insert_issue_tx(tx, &placeholder)?;
    if let Some(parent) = parent_of(id) {
        tx.execute(
            "INSERT OR IGNORE INTO dependencies
                (issue_id, depends_on_id, type, created_at_ms)
             VALUES (?1, ?2, 'parent-child', ?3)",
            params![id, parent, now_ms],
        )?;
    }
    report.resurrected += 1;
    Ok(())
}

/// Rename a stored issue by copying the row under the new ID, repointing
/// children, and deleting the old row (plain `UPDATE id` would trip the
/// child foreign keys).
fn rename_issue_tx(tx: &Transaction<'_>, old_id: &str, new_id: &str) -> Result<(), StoreError> {
    let mut issue = get_issue_any_tx(tx, old_id)?.ok_or_else(|| StoreError::NotFound {
        id: old_id.to_string(),
    })?;
    load_relations(tx, &mut issue)?;

    issue.id = new_id.to_string();
    for dep in &mut issue.dependencies {
        dep.issue_id = new_id.to_string();
    }
    insert_issue_tx(tx, &issue)?;
    insert_relations_tx(tx, &issue)?;

    for sql in [
        "UPDATE events SET issue_id = ?2 WHERE issue_id = ?1",
        "UPDATE OR IGNORE dependencies SET depends_on_id = ?2 WHERE depends_on_id = ?1",
        "UPDATE child_counters SET parent_id = ?2 WHERE parent_id = ?1",
    ] {
        tx.execute(sql, params![old_id, new_id])?;
    }
    tx.execute(
        "DELETE FROM dependencies WHERE depends_on_id = ?1",
        params![old_id],
    )?;
    tx.execute("DELETE FROM issues WHERE id = ?1", params![old_id])?;
    Ok(())
}

fn rewrite_record_references(record: &mut Issue, rename: &HashMap<String, String>) {
    for dep in &mut record.dependencies {
        dep.issue_id = record.id.clone();
        if let Some(new_id) = rename.get(&dep.depends_on_id) {
            dep.depends_on_id = new_id.clone();
        }
    }
    for comment in &mut record.comments {
        comment.issue_id = record.id.clone();
        comment.text = rewrite_ids(&comment.text, rename);
    }
    record.title = rewrite_ids(&record.title, rename);
    for field in [
        &mut record.description,
        &mut record.design,
        &mut record.acceptance_criteria,
        &mut record.notes,
    ] {
        if let Some(text) = field.as_mut() {
            *text = rewrite_ids(text, rename);
        }
    }
}

/// Boundary-aware textual rewrite: IDs are matched as whole tokens over
/// the ID alphabet, so `bd-1` never rewrites inside `bd-10`. Trailing
/// sentence punctuation in the ID alphabet (`bd-1.`) is peeled off.
fn rewrite_ids(text: &str, rename: &HashMap<String, String>) -> String {
    let is_id_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_');
    let mut out = String::with_capacity(text.len());
    let mut token = String::new();

    let mut flush = |token: &mut String, out: &mut String| {
        if token.is_empty() {
            return;
        }
        let mut core: &str = token.as_str();
        let mut suffix_len = 0;
        while !core.is_empty() && !rename.contains_key(core) {
            let Some(last) = core.chars().last() else { break };
            if matches!(last, '.' | '-' | '_') {
                core = &core[..core.len() - last.len_utf8()];
                suffix_len += last.len_utf8();
            } else {
                break;
            }
        }
        if let Some(new_id) = rename.get(core) {
            out.push_str(new_id);
            out.push_str(&token[token.len() - suffix_len..]);
        } else {
            out.push_str(token);
        }
        token.clear();
    };

    for c in text.chars() {
        if is_id_char(c) {
            token.push(c);
        } else {
            flush(&mut token, &mut out);
            out.push(c);
        }
    }
    flush(&mut token, &mut out);
    out
}

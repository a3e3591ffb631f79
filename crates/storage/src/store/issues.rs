#![forbid(unsafe_code)]
//! Issue CRUD: the transactional write path and the read surface.

use super::{
    cycles, deps, CreateIssue, IssueDetails, IssueUpdate, ListFilters, SqliteStore, StoreError,
};
use braid_core::graph::is_external_sentinel;
use braid_core::hash::content_hash;
use braid_core::idgen::{
    child_id, compose_id, hash_portion, required_hash_length, validate_explicit_id, IdConfig,
    FALLBACK_HASH_LENGTH, MAX_NONCE,
};
use braid_core::model::{
    reject_reserved_label, validate_label, validate_title, EventType, Issue, IssueType, Priority,
    Status,
};
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fmt::Write as _;

pub(crate) const ISSUE_COLUMNS: &str = "id, content_hash, title, description, design, acceptance_criteria, notes, \
     status, priority, issue_type, assignee, owner, created_by, estimated_minutes, \
     created_at_ms, updated_at_ms, closed_at_ms, close_reason, closed_by_session, \
     due_at_ms, defer_until_ms, external_ref, source_system, \
     deleted_at_ms, deleted_by, delete_reason, original_type, \
     ephemeral, pinned, is_template";

pub(crate) fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        content_hash: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        design: row.get(4)?,
        acceptance_criteria: row.get(5)?,
        notes: row.get(6)?,
        status: Status::parse(&row.get::<_, String>(7)?),
        priority: Priority(row.get::<_, i64>(8)?.clamp(0, 4) as u8),
        issue_type: IssueType::parse(&row.get::<_, String>(9)?),
        assignee: row.get(10)?,
        owner: row.get(11)?,
        created_by: row.get(12)?,
        estimated_minutes: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        closed_at: row.get(16)?,
        close_reason: row.get(17)?,
        closed_by_session: row.get(18)?,
        due_at: row.get(19)?,
        defer_until: row.get(20)?,
        external_ref: row.get(21)?,
        source_system: row.get(22)?,
        deleted_at: row.get(23)?,
        deleted_by: row.get(24)?,
        delete_reason: row.get(25)?,
        original_type: row.get(26)?,
        ephemeral: row.get::<_, i64>(27)? != 0,
        pinned: row.get::<_, i64>(28)? != 0,
        is_template: row.get::<_, i64>(29)? != 0,
        labels: Vec::new(),
        dependencies: Vec::new(),
        comments: Vec::new(),
    })
}

/// Fetch by ID, tombstones included, relations not loaded.
pub(crate) fn get_issue_any_tx(conn: &Connection, id: &str) -> Result<Option<Issue>, StoreError> {
    let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1");
    Ok(conn
        .query_row(&sql, params![id], issue_from_row)
        .optional()?)
}

pub(crate) fn load_relations(conn: &Connection, issue: &mut Issue) -> Result<(), StoreError> {
    let mut stmt =
        conn.prepare("SELECT label FROM labels WHERE issue_id = ?1 ORDER BY label")?;
    issue.labels = stmt
        .query_map(params![issue.id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;

    issue.dependencies = deps::dependency_rows(conn, &issue.id)?;

    let mut stmt = conn.prepare(
        "SELECT id, issue_id, author, text, created_at_ms
         FROM comments WHERE issue_id = ?1 ORDER BY created_at_ms ASC, id ASC",
    )?;
    issue.comments = stmt
        .query_map(params![issue.id], |row| {
            Ok(braid_core::model::Comment {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                author: row.get(2)?,
                text: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(())
}

pub(crate) fn insert_issue_tx(conn: &Connection, issue: &Issue) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO issues (
            id, content_hash, title, description, design, acceptance_criteria, notes,
            status, priority, issue_type, assignee, owner, created_by, estimated_minutes,
            created_at_ms, updated_at_ms, closed_at_ms, close_reason, closed_by_session,
            due_at_ms, defer_until_ms, external_ref, source_system,
            deleted_at_ms, deleted_by, delete_reason, original_type,
            ephemeral, pinned, is_template
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                   ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30)",
        params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            i64::from(issue.priority.0),
            issue.issue_type.as_str(),
            issue.assignee,
            issue.owner,
            issue.created_by,
            issue.estimated_minutes,
            issue.created_at,
            issue.updated_at,
            issue.closed_at,
            issue.close_reason,
            issue.closed_by_session,
            issue.due_at,
            issue.defer_until,
            issue.external_ref,
            issue.source_system,
            issue.deleted_at,
            issue.deleted_by,
            issue.delete_reason,
            issue.original_type,
            issue.ephemeral as i64,
            issue.pinned as i64,
            issue.is_template as i64,
        ],
    )?;
    Ok(())
}

pub(crate) fn update_issue_row_tx(conn: &Connection, issue: &Issue) -> Result<(), StoreError> {
    let rows = conn.execute(
        "UPDATE issues SET
            content_hash = ?2, title = ?3, description = ?4, design = ?5,
            acceptance_criteria = ?6, notes = ?7, status = ?8, priority = ?9,
            issue_type = ?10, assignee = ?11, owner = ?12, created_by = ?13,
            estimated_minutes = ?14, created_at_ms = ?15, updated_at_ms = ?16,
            closed_at_ms = ?17, close_reason = ?18, closed_by_session = ?19,
            due_at_ms = ?20, defer_until_ms = ?21, external_ref = ?22,
            source_system = ?23, deleted_at_ms = ?24, deleted_by = ?25,
            delete_reason = ?26, original_type = ?27, ephemeral = ?28,
            pinned = ?29, is_template = ?30
         WHERE id = ?1",
        params![
            issue.id,
            issue.content_hash,
            issue.title,
            issue.description,
            issue.design,
            issue.acceptance_criteria,
            issue.notes,
            issue.status.as_str(),
            i64::from(issue.priority.0),
            issue.issue_type.as_str(),
            issue.assignee,
            issue.owner,
            issue.created_by,
            issue.estimated_minutes,
            issue.created_at,
            issue.updated_at,
            issue.closed_at,
            issue.close_reason,
            issue.closed_by_session,
            issue.due_at,
            issue.defer_until,
            issue.external_ref,
            issue.source_system,
            issue.deleted_at,
            issue.deleted_by,
            issue.delete_reason,
            issue.original_type,
            issue.ephemeral as i64,
            issue.pinned as i64,
            issue.is_template as i64,
        ],
    )?;
    if rows == 0 {
        return Err(StoreError::NotFound {
            id: issue.id.clone(),
        });
    }
    Ok(())
}

/// Recompute and persist the content hash from current row + relations.
pub(crate) fn refresh_content_hash_tx(
    conn: &Connection,
    id: &str,
) -> Result<String, StoreError> {
    let mut issue = get_issue_any_tx(conn, id)?.ok_or_else(|| StoreError::NotFound {
        id: id.to_string(),
    })?;
    load_relations(conn, &mut issue)?;
    let hash = content_hash(&issue);
    conn.execute(
        "UPDATE issues SET content_hash = ?2 WHERE id = ?1",
        params![id, hash],
    )?;
    Ok(hash)
}

fn allocate_id_tx(
    conn: &Connection,
    cfg: &IdConfig,
    input: &CreateIssue,
    workspace_id: &str,
    created_at_ns: i128,
) -> Result<String, StoreError> {
    let count: i64 = conn.query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
    let start = required_hash_length(usize::try_from(count).unwrap_or(0), cfg);

    let title = input.title.trim();
    let description = input.description.as_deref().unwrap_or("");
    let creator = input.created_by.as_deref().unwrap_or("");

    let mut lengths: Vec<usize> = (start..=cfg.max_length.max(start)).collect();
    lengths.push(FALLBACK_HASH_LENGTH);
    for length in lengths {
        for nonce in 0..=MAX_NONCE {
            let candidate = compose_id(
                &cfg.prefix,
                &hash_portion(
                    title,
                    description,
                    creator,
                    created_at_ns,
                    nonce,
                    workspace_id,
                    length,
                ),
            );
            let taken = conn
                .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                .exists(params![candidate])?;
            if !taken {
                return Ok(candidate);
            }
        }
    }
    Err(braid_core::DomainError::IdSpaceExhausted.into())
}

fn next_child_tx(conn: &Connection, parent_id: &str) -> Result<i64, StoreError> {
    let next: i64 = conn.query_row(
        "INSERT INTO child_counters (parent_id, last_child) VALUES (?1, 1)
         ON CONFLICT(parent_id) DO UPDATE SET last_child = last_child + 1
         RETURNING last_child",
        params![parent_id],
        |row| row.get(0),
    )?;
    Ok(next)
}

impl SqliteStore {
    /// Create an issue together with its initial labels and dependencies.
    pub fn create_issue(&mut self, input: CreateIssue, actor: &str) -> Result<Issue, StoreError> {
        let title = validate_title(&input.title)?;
        let status = input.status.clone().unwrap_or_default();
        let issue_type = input.issue_type.clone().unwrap_or_default();
        self.validate_status(&status)?;
        self.validate_issue_type(&issue_type)?;
        if status == Status::Tombstone {
            return Err(StoreError::Validation(
                "issues cannot be created as tombstones".to_string(),
            ));
        }
        if let Some(minutes) = input.estimated_minutes {
            if minutes < 0 {
                return Err(braid_core::DomainError::NegativeEstimate { value: minutes }.into());
            }
        }
        for label in &input.labels {
            validate_label(label)?;
            reject_reserved_label(label)?;
        }
        for dep in &input.dependencies {
            if is_external_sentinel(&dep.depends_on_id) {
                braid_core::graph::ExternalSentinel::parse(&dep.depends_on_id)?;
            }
        }

        let cfg = self.id_config()?;
        if let Some(id) = &input.id {
            validate_explicit_id(id, &cfg.prefix)?;
        }
        let workspace_id = self.workspace_id()?;
        let now = now_ms();
        let created_at_ns = i128::from(now) * 1_000_000;

        let issue = self.mutate(actor, |tx, ctx| {
            let id = match (&input.id, &input.parent) {
                (Some(explicit), _) => {
                    let taken = tx
                        .prepare("SELECT 1 FROM issues WHERE id = ?1")?
                        .exists(params![explicit])?;
                    if taken {
                        return Err(StoreError::Conflict(format!(
                            "issue {explicit} already exists"
                        )));
                    }
                    explicit.clone()
                }
                (None, Some(parent)) => {
                    if get_issue_any_tx(tx, parent)?.is_none() {
                        return Err(StoreError::NotFound { id: parent.clone() });
                    }
                    child_id(parent, next_child_tx(tx, parent)?, &cfg)?
                }
                (None, None) => allocate_id_tx(tx, &cfg, &input, &workspace_id, created_at_ns)?,
            };

            let mut issue = Issue::new(id.clone(), title.clone(), now);
            issue.description = input.description.clone();
            issue.design = input.design.clone();
            issue.acceptance_criteria = input.acceptance_criteria.clone();
            issue.notes = input.notes.clone();
            issue.status = status.clone();
            issue.priority = input.priority.unwrap_or_default();
            issue.issue_type = issue_type.clone();
            issue.assignee = input.assignee.clone();
            issue.owner = input.owner.clone();
            issue.created_by = input.created_by.clone();
            issue.estimated_minutes = input.estimated_minutes;
            issue.due_at = input.due_at;
            issue.defer_until = input.defer_until;
            issue.external_ref = input.external_ref.clone();
            issue.source_system = input.source_system.clone();
            issue.pinned = input.pinned;
            issue.is_template = input.is_template;
            issue.ephemeral = input.ephemeral;
            if issue.status == Status::Closed {
                issue.closed_at = Some(now);
            }
            issue.normalize_and_validate()?;
            insert_issue_tx(tx, &issue)?;

            for label in &input.labels {
                tx.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, label) VALUES (?1, ?2)",
                    params![id, label],
                )?;
            }

            let mut parent_edges = input.dependencies.clone();
            if let Some(parent) = &input.parent {
                parent_edges.push(super::DepEdgeInput::typed(
                    parent.clone(),
                    braid_core::model::DepType::ParentChild,
                ));
            }
            for edge in &parent_edges {
                deps::insert_dependency_tx(tx, ctx, &id, edge, now)?;
            }

            refresh_content_hash_tx(tx, &id)?;
            ctx.record_event(
                EventType::Created,
                &id,
                Some(format!("Created issue: {title}")),
            );
            ctx.mark_dirty(&id);
            if !parent_edges.is_empty() {
                ctx.refresh_cache();
            }

            let mut created = get_issue_any_tx(tx, &id)?.ok_or(StoreError::NotFound { id })?;
            load_relations(tx, &mut created)?;
            Ok(created)
        })?;

        Ok(issue)
    }

    /// Read path; tombstones are excluded by default.
    pub fn get_issue(&self, id: &str) -> Result<Option<Issue>, StoreError> {
        match self.get_issue_any(id)? {
            Some(issue) if issue.status == Status::Tombstone => Ok(None),
            other => Ok(other),
        }
    }

    /// Read path including tombstones; relations are loaded.
    pub fn get_issue_any(&self, id: &str) -> Result<Option<Issue>, StoreError> {
        let Some(mut issue) = get_issue_any_tx(&self.conn, id)? else {
            return Ok(None);
        };
        load_relations(&self.conn, &mut issue)?;
        Ok(Some(issue))
    }

    /// Apply a field-level patch. Emits one event per observable change,
    /// auto-manages the closed boundary, recomputes the content hash when
    /// a hashed field changed.
    pub fn update_issue(
        &mut self,
        id: &str,
        patch: &IssueUpdate,
        actor: &str,
    ) -> Result<Issue, StoreError> {
        if matches!(patch.status, Some(Status::Tombstone)) {
            return Err(StoreError::Validation(
                "use delete_issue to tombstone an issue".to_string(),
            ));
        }
        if let Some(status) = &patch.status {
            self.validate_status(status)?;
        }
        if let Some(issue_type) = &patch.issue_type {
            self.validate_issue_type(issue_type)?;
        }
        let new_title = match &patch.title {
            Some(raw) => Some(validate_title(raw)?),
            None => None,
        };
        if patch.is_empty() {
            return Err(StoreError::Validation("empty update".to_string()));
        }

        let id = id.to_string();
        let patch = patch.clone();
        self.mutate(actor, move |tx, ctx| {
            let mut issue =
                get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                    id: id.clone(),
                })?;
            if issue.status == Status::Tombstone {
                return Err(StoreError::NotFound { id: id.clone() });
            }

            let before = issue.clone();
            let mut changed = false;

            macro_rules! set_opt {
                ($field:ident) => {
                    if let Some(value) = patch.$field.clone() {
                        if issue.$field != value {
                            ctx.record_change(
                                EventType::Updated,
                                &id,
                                display_opt(&issue.$field),
                                display_opt(&value),
                                Some(format!("{} changed", stringify!($field))),
                            );
                            issue.$field = value;
                            changed = true;
                        }
                    }
                };
            }

            if let Some(title) = new_title.clone() {
                if issue.title != title {
                    ctx.record_change(
                        EventType::Updated,
                        &id,
                        Some(issue.title.clone()),
                        Some(title.clone()),
                        Some("title changed".to_string()),
                    );
                    issue.title = title;
                    changed = true;
                }
            }
            set_opt!(description);
            set_opt!(design);
            set_opt!(acceptance_criteria);
            set_opt!(notes);
            set_opt!(assignee);
            set_opt!(owner);
            set_opt!(estimated_minutes);
            set_opt!(due_at);
            set_opt!(defer_until);
            set_opt!(external_ref);
            set_opt!(source_system);
            set_opt!(close_reason);

            if let Some(priority) = patch.priority {
                if issue.priority != priority {
                    ctx.record_change(
                        EventType::Updated,
                        &id,
                        Some(issue.priority.0.to_string()),
                        Some(priority.0.to_string()),
                        Some("priority changed".to_string()),
                    );
                    issue.priority = priority;
                    changed = true;
                }
            }
            if let Some(issue_type) = patch.issue_type.clone() {
                if issue.issue_type != issue_type {
                    ctx.record_change(
                        EventType::Updated,
                        &id,
                        Some(issue.issue_type.to_string()),
                        Some(issue_type.to_string()),
                        Some("issue_type changed".to_string()),
                    );
                    issue.issue_type = issue_type;
                    changed = true;
                }
            }
            if let Some(pinned) = patch.pinned {
                if issue.pinned != pinned {
                    issue.pinned = pinned;
                    ctx.record_event(EventType::Updated, &id, Some("pinned changed".to_string()));
                    changed = true;
                }
            }
            if let Some(is_template) = patch.is_template {
                if issue.is_template != is_template {
                    issue.is_template = is_template;
                    ctx.record_event(
                        EventType::Updated,
                        &id,
                        Some("is_template changed".to_string()),
                    );
                    changed = true;
                }
            }

            let mut status_changed = false;
            if let Some(status) = patch.status.clone() {
                if issue.status != status {
                    let now = now_ms();
                    let crossing_into_closed =
                        status == Status::Closed && before.status != Status::Closed;
                    let crossing_out_of_closed =
                        before.status == Status::Closed && status != Status::Closed;
                    if crossing_into_closed {
                        issue.closed_at = Some(now);
                        ctx.record_change(
                            EventType::Closed,
                            &id,
                            Some(before.status.to_string()),
                            Some(status.to_string()),
                            issue.close_reason.clone(),
                        );
                    } else if crossing_out_of_closed {
                        issue.closed_at = None;
                        issue.close_reason = None;
                        issue.closed_by_session = None;
                        ctx.record_change(
                            EventType::Reopened,
                            &id,
                            Some(before.status.to_string()),
                            Some(status.to_string()),
                            None,
                        );
                    } else {
                        ctx.record_change(
                            EventType::StatusChanged,
                            &id,
                            Some(before.status.to_string()),
                            Some(status.to_string()),
                            None,
                        );
                    }
                    issue.status = status;
                    changed = true;
                    status_changed = true;
                }
            }

            if !changed {
                load_relations(tx, &mut issue)?;
                return Ok(issue);
            }

            issue.updated_at = now_ms();
            issue.normalize_and_validate()?;
            update_issue_row_tx(tx, &issue)?;
            refresh_content_hash_tx(tx, &id)?;
            ctx.mark_dirty(&id);
            if status_changed {
                ctx.refresh_cache();
            }

            let mut updated = get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                id: id.clone(),
            })?;
            load_relations(tx, &mut updated)?;
            Ok(updated)
        })
    }

    /// Close an issue. Unless `force`, refuses while an open blocker holds
    /// the issue.
    pub fn close_issue(
        &mut self,
        id: &str,
        reason: &str,
        session: Option<&str>,
        force: bool,
        actor: &str,
    ) -> Result<Issue, StoreError> {
        let id = id.to_string();
        let reason = reason.to_string();
        let session = session.map(str::to_string);
        self.mutate(actor, move |tx, ctx| {
            let mut issue =
                get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                    id: id.clone(),
                })?;
            if issue.status == Status::Tombstone {
                return Err(StoreError::NotFound { id: id.clone() });
            }
            if issue.status == Status::Closed {
                return Err(StoreError::Validation(format!("{id} is already closed")));
            }
            if !force {
                let blockers = cycles::open_blockers_tx(tx, &id)?;
                if !blockers.is_empty() {
                    return Err(StoreError::Validation(format!(
                        "{id} is blocked by open dependencies: {}",
                        blockers.join(", ")
                    )));
                }
            }

            let now = now_ms();
            issue.status = Status::Closed;
            issue.closed_at = Some(now);
            issue.close_reason = Some(reason.clone());
            issue.closed_by_session = session.clone();
            issue.updated_at = now;
            update_issue_row_tx(tx, &issue)?;
            refresh_content_hash_tx(tx, &id)?;
            ctx.record_event(EventType::Closed, &id, Some(reason.clone()));
            ctx.mark_dirty(&id);
            ctx.refresh_cache();

            load_relations(tx, &mut issue)?;
            Ok(issue)
        })
    }

    pub fn reopen_issue(&mut self, id: &str, actor: &str) -> Result<Issue, StoreError> {
        let id = id.to_string();
        self.mutate(actor, move |tx, ctx| {
            let mut issue =
                get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                    id: id.clone(),
                })?;
            if issue.status == Status::Tombstone {
                return Err(StoreError::Validation(format!(
                    "{id} is deleted; restore it instead"
                )));
            }
            if issue.status != Status::Closed {
                return Err(StoreError::Validation(format!("{id} is not closed")));
            }

            issue.status = Status::Open;
            issue.closed_at = None;
            issue.close_reason = None;
            issue.closed_by_session = None;
            issue.updated_at = now_ms();
            update_issue_row_tx(tx, &issue)?;
            refresh_content_hash_tx(tx, &id)?;
            ctx.record_event(EventType::Reopened, &id, None);
            ctx.mark_dirty(&id);
            ctx.refresh_cache();

            load_relations(tx, &mut issue)?;
            Ok(issue)
        })
    }

    /// Soft delete: transition to tombstone, preserving the original kind.
    /// The tombstone stays in the mirror to propagate across clones.
    pub fn delete_issue(
        &mut self,
        id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<Issue, StoreError> {
        let id = id.to_string();
        let reason = reason.to_string();
        self.mutate(actor, move |tx, ctx| {
            let mut issue =
                get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                    id: id.clone(),
                })?;
            if issue.status == Status::Tombstone {
                return Err(StoreError::Validation(format!("{id} is already deleted")));
            }

            let now = now_ms();
            issue.original_type = Some(issue.issue_type.to_string());
            issue.status = Status::Tombstone;
            issue.deleted_at = Some(now);
            issue.deleted_by = Some(ctx.actor().to_string());
            issue.delete_reason = Some(reason.clone());
            issue.updated_at = now;
            update_issue_row_tx(tx, &issue)?;
            refresh_content_hash_tx(tx, &id)?;
            ctx.record_event(EventType::Deleted, &id, Some(reason.clone()));
            ctx.mark_dirty(&id);
            ctx.refresh_cache();

            load_relations(tx, &mut issue)?;
            Ok(issue)
        })
    }

    /// Reverse of soft delete, only while the record is still a tombstone
    /// locally.
    pub fn restore_issue(&mut self, id: &str, actor: &str) -> Result<Issue, StoreError> {
        let id = id.to_string();
        self.mutate(actor, move |tx, ctx| {
            let mut issue =
                get_issue_any_tx(tx, &id)?.ok_or_else(|| StoreError::NotFound {
                    id: id.clone(),
                })?;
            if issue.status != Status::Tombstone {
                return Err(StoreError::Validation(format!("{id} is not deleted")));
            }

            if let Some(original) = issue.original_type.take() {
                issue.issue_type = IssueType::parse(&original);
            }
            issue.status = Status::Open;
            issue.closed_at = None;
            issue.close_reason = None;
            issue.closed_by_session = None;
            issue.deleted_at = None;
            issue.deleted_by = None;
            issue.delete_reason = None;
            issue.updated_at = now_ms();
            update_issue_row_tx(tx, &issue)?;
            refresh_content_hash_tx(tx, &id)?;
            ctx.record_event(EventType::Restored, &id, None);
            ctx.mark_dirty(&id);
            ctx.refresh_cache();

            load_relations(tx, &mut issue)?;
            Ok(issue)
        })
    }

    /// Physical removal, permitted only for never-exported ephemerals.
    /// Owned relations cascade; the dirty set is left untouched.
    pub fn hard_delete_issue(&mut self, id: &str) -> Result<(), StoreError> {
        let issue = get_issue_any_tx(&self.conn, id)?.ok_or_else(|| StoreError::NotFound {
            id: id.to_string(),
        })?;
        if !issue.ephemeral {
            return Err(StoreError::Validation(format!(
                "{id} is not ephemeral; use delete_issue"
            )));
        }
        if self.has_been_exported(id)? {
            return Err(StoreError::Validation(format!(
                "{id} has been exported; use delete_issue"
            )));
        }

        let tx = support_tx(&mut self.conn)?;
        tx.execute("DELETE FROM issues WHERE id = ?1", params![id])?;
        super::blocked::rebuild_blocked_cache_tx(&tx)?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_issues(&self, filters: &ListFilters) -> Result<Vec<Issue>, StoreError> {
        self.query_issues(None, filters)
    }

    /// Substring search across title, description and id, with the same
    /// filter set as `list_issues`.
    pub fn search_issues(
        &self,
        query: &str,
        filters: &ListFilters,
    ) -> Result<Vec<Issue>, StoreError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        self.query_issues(Some(trimmed), filters)
    }

    fn query_issues(
        &self,
        search: Option<&str>,
        filters: &ListFilters,
    ) -> Result<Vec<Issue>, StoreError> {
        let mut sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(query) = search {
            sql.push_str(" AND (title LIKE ? OR description LIKE ? OR id LIKE ?)");
            let pattern = format!("%{query}%");
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern.clone()));
            params.push(Box::new(pattern));
        }

        if let Some(statuses) = &filters.statuses {
            if !statuses.is_empty() {
                let placeholders = vec!["?"; statuses.len()].join(",");
                let _ = write!(sql, " AND status IN ({placeholders})");
                for status in statuses {
                    params.push(Box::new(status.as_str().to_string()));
                }
            }
        }
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
        if !filters.include_closed {
            sql.push_str(" AND status NOT IN ('closed', 'tombstone')");
        } else {
            sql.push_str(" AND status <> 'tombstone'");
        }
        if !filters.include_templates {
            sql.push_str(" AND is_template = 0");
        }
        if let Some(title_contains) = &filters.title_contains {
            sql.push_str(" AND title LIKE ?");
            params.push(Box::new(format!("%{title_contains}%")));
        }

        sql.push_str(" ORDER BY priority ASC, created_at_ms DESC");
        if let Some(limit) = filters.limit {
            if limit > 0 {
                let _ = write!(sql, " LIMIT {limit}");
            }
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(AsRef::as_ref).collect();
        let issues = stmt
            .query_map(params_refs.as_slice(), issue_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(issues)
    }

    /// Everything a detail surface needs for one issue, in one call.
    pub fn get_issue_details(
        &self,
        id: &str,
        include_comments: bool,
        include_events: bool,
        event_limit: usize,
    ) -> Result<Option<IssueDetails>, StoreError> {
        let Some(issue) = self.get_issue_any(id)? else {
            return Ok(None);
        };

        let labels = issue.labels.clone();
        let dependencies = self.get_dependencies_with_metadata(id)?;
        let dependents = self.get_dependents_with_metadata(id)?;
        let comments = if include_comments {
            issue.comments.clone()
        } else {
            Vec::new()
        };
        let events = if include_events {
            self.get_events(id, event_limit)?
        } else {
            Vec::new()
        };
        let parent = self.get_parent_id(id)?;

        Ok(Some(IssueDetails {
            issue,
            labels,
            dependencies,
            dependents,
            comments,
            events,
            parent,
        }))
    }

    /// Issue counts per status, for summary surfaces.
    pub fn status_counts(&self) -> Result<Vec<(Status, usize)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, count(*) FROM issues GROUP BY status ORDER BY status")?;
        let counts = stmt
            .query_map([], |row| {
                Ok((
                    Status::parse(&row.get::<_, String>(0)?),
                    usize::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// All issues with relations loaded, sorted by ID; the export snapshot.
    pub(crate) fn all_issues_with_relations(&self) -> Result<Vec<Issue>, StoreError> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut issues = stmt
            .query_map([], issue_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        for issue in &mut issues {
            load_relations(&self.conn, issue)?;
        }
        Ok(issues)
    }
}

fn support_tx(conn: &mut Connection) -> Result<rusqlite::Transaction<'_>, StoreError> {
    super::support::immediate_tx(conn)
}

fn display_opt<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(ToString::to_string)
}

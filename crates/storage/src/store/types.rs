#![forbid(unsafe_code)]
//! Request/response types for the store surface.

use braid_core::graph::ExternalSentinel;
use braid_core::model::{Comment, DepType, Event, Issue, IssueType, Priority, Status};
use std::collections::HashMap;

/// Input for `create_issue`. Relations listed here are written in the same
/// transaction as the issue row.
#[derive(Clone, Debug, Default)]
pub struct CreateIssue {
    /// Explicit ID; generated when absent.
    pub id: Option<String>,
    /// Parent issue for a dotted child ID.
    pub parent: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub design: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub notes: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<String>,
    pub owner: Option<String>,
    pub created_by: Option<String>,
    pub estimated_minutes: Option<i64>,
    pub due_at: Option<i64>,
    pub defer_until: Option<i64>,
    pub external_ref: Option<String>,
    pub source_system: Option<String>,
    pub pinned: bool,
    pub is_template: bool,
    pub ephemeral: bool,
    pub labels: Vec<String>,
    pub dependencies: Vec<DepEdgeInput>,
}

/// A dependency edge to attach at creation or via `add_dependency`.
#[derive(Clone, Debug)]
pub struct DepEdgeInput {
    pub depends_on_id: String,
    pub dep_type: DepType,
    pub metadata: Option<String>,
    pub thread_id: Option<String>,
}

impl DepEdgeInput {
    pub fn blocks(depends_on_id: impl Into<String>) -> Self {
        Self {
            depends_on_id: depends_on_id.into(),
            dep_type: DepType::Blocks,
            metadata: None,
            thread_id: None,
        }
    }

    pub fn typed(depends_on_id: impl Into<String>, dep_type: DepType) -> Self {
        Self {
            depends_on_id: depends_on_id.into(),
            dep_type,
            metadata: None,
            thread_id: None,
        }
    }
}

/// Field-level patch for `update_issue`. `Some(None)` clears a nullable
/// field; `None` leaves it untouched. `status = tombstone` is rejected on
/// this path (soft delete owns that transition).
#[derive(Clone, Debug, Default)]
pub struct IssueUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub design: Option<Option<String>>,
    pub acceptance_criteria: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub issue_type: Option<IssueType>,
    pub assignee: Option<Option<String>>,
    pub owner: Option<Option<String>>,
    pub estimated_minutes: Option<Option<i64>>,
    pub due_at: Option<Option<i64>>,
    pub defer_until: Option<Option<i64>>,
    pub external_ref: Option<Option<String>>,
    pub source_system: Option<Option<String>>,
    pub close_reason: Option<Option<String>>,
    pub pinned: Option<bool>,
    pub is_template: Option<bool>,
}

impl IssueUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.design.is_none()
            && self.acceptance_criteria.is_none()
            && self.notes.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.issue_type.is_none()
            && self.assignee.is_none()
            && self.owner.is_none()
            && self.estimated_minutes.is_none()
            && self.due_at.is_none()
            && self.defer_until.is_none()
            && self.external_ref.is_none()
            && self.source_system.is_none()
            && self.close_reason.is_none()
            && self.pinned.is_none()
            && self.is_template.is_none()
    }
}

/// Filters for `list_issues` and `search_issues`.
#[derive(Clone, Debug, Default)]
pub struct ListFilters {
    pub statuses: Option<Vec<Status>>,
    pub types: Option<Vec<IssueType>>,
    pub priorities: Option<Vec<Priority>>,
    pub assignee: Option<String>,
    pub unassigned: bool,
    pub include_closed: bool,
    pub include_templates: bool,
    pub title_contains: Option<String>,
    pub limit: Option<usize>,
}

/// Filters for the ready-work query.
#[derive(Clone, Debug, Default)]
pub struct ReadyFilters {
    pub types: Option<Vec<IssueType>>,
    pub priorities: Option<Vec<Priority>>,
    pub assignee: Option<String>,
    pub unassigned: bool,
    pub limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadySortPolicy {
    /// Priority tiers 0..1 before 2..4; within tier, oldest first.
    Hybrid,
    Priority,
    Oldest,
}

impl Default for ReadySortPolicy {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl ReadySortPolicy {
    pub fn parse(value: &str) -> Self {
        match value {
            "priority" => Self::Priority,
            "oldest" => Self::Oldest,
            _ => Self::Hybrid,
        }
    }
}

/// A dependency edge joined with the far issue's display fields.
#[derive(Clone, Debug)]
pub struct DependencyInfo {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub dep_type: DepType,
}

/// Aggregate read for a single issue.
#[derive(Clone, Debug)]
pub struct IssueDetails {
    pub issue: Issue,
    pub labels: Vec<String>,
    pub dependencies: Vec<DependencyInfo>,
    pub dependents: Vec<DependencyInfo>,
    pub comments: Vec<Comment>,
    pub events: Vec<Event>,
    pub parent: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TreeDirection {
    Down,
    Up,
    Both,
}

/// Flattened node of a dependency-tree traversal.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub depth: usize,
    pub parent_id: Option<String>,
    pub truncated: bool,
    pub external: bool,
}

#[derive(Clone, Debug)]
pub struct TreeOptions {
    pub direction: TreeDirection,
    /// Defaults to 50 when unset.
    pub max_depth: Option<usize>,
    /// Keep diamond re-visits instead of deduping to the shallowest path.
    pub all_paths: bool,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            direction: TreeDirection::Down,
            max_depth: None,
            all_paths: false,
        }
    }
}

/// Pull-only resolution of external sentinels. The core never opens a
/// foreign store on its own; the collaborator supplies this capability.
pub trait ExternalResolver {
    /// Status of the sentinel target, if the collaborator can resolve it
    /// (a closed issue labelled `provides:<capability>` in the named
    /// project resolves to `Status::Closed`).
    fn resolve(&self, sentinel: &ExternalSentinel) -> Option<Status>;
}

/// Default resolver: everything external reads as open.
pub struct NoExternalResolution;

impl ExternalResolver for NoExternalResolution {
    fn resolve(&self, _sentinel: &ExternalSentinel) -> Option<Status> {
        None
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchType {
    Exact,
    Normalized,
    HashPortion,
    Substring,
}

#[derive(Clone, Debug)]
pub struct ResolvedId {
    pub id: String,
    pub match_type: MatchType,
}

/// How to treat a `parent-child` child whose parent is missing on import.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrphanHandling {
    Strict,
    Resurrect,
    Skip,
    Allow,
}

impl Default for OrphanHandling {
    fn default() -> Self {
        Self::Allow
    }
}

impl OrphanHandling {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "strict" => Some(Self::Strict),
            "resurrect" => Some(Self::Resurrect),
            "skip" => Some(Self::Skip),
            "allow" => Some(Self::Allow),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ImportOptions {
    /// Rewrite mismatched-prefix IDs to the workspace prefix, including
    /// boundary-aware textual references.
    pub rename_on_import: bool,
    pub orphan_handling: OrphanHandling,
    /// Local-export protection: incoming records with `updated_at` at or
    /// before the mapped timestamp are skipped.
    pub protect_ids: HashMap<String, i64>,
    /// Keep the first of duplicate external refs and null the rest instead
    /// of failing the batch.
    pub dedupe_external_refs: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub renamed: usize,
    pub skipped: usize,
    pub tombstone_skipped: usize,
    pub protected_skipped: usize,
    pub orphans_dropped: usize,
    pub resurrected: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ExportOptions {
    /// Export everything rather than consulting the dirty set.
    pub full: bool,
    /// Override the empty-store refusal for full exports.
    pub allow_empty_overwrite: bool,
    /// File mode for the mirror (0o600 single-workspace, 0o644 shared).
    pub file_mode: Option<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Records written to the mirror (whole snapshot when not skipped).
    pub written: usize,
    /// Dirty entries whose content hash matched the last export.
    pub unchanged: usize,
    /// True when the incremental path found nothing to write.
    pub skipped: bool,
}

#![forbid(unsafe_code)]
//! Entities and their invariants.
//!
//! `Status`, `IssueType` and `DepType` are open string sets: the built-in
//! values get first-class variants, anything else rides along as `Custom`
//! and round-trips verbatim. Workspace configuration decides which custom
//! values are accepted on the write path; the parse layer never coerces.

use crate::error::DomainError;
use crate::timefmt::{rfc3339_ms, rfc3339_ms_opt};
use serde::{Deserialize, Serialize};

macro_rules! fmt_as_str {
    () => {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    };
}

pub const MAX_TITLE_CHARS: usize = 500;
pub const MAX_LABEL_CHARS: usize = 100;
pub const RESERVED_LABEL_PREFIX: &str = "provides:";

/// Workflow status of an issue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Status {
    Open,
    InProgress,
    Blocked,
    Deferred,
    Closed,
    Tombstone,
    Pinned,
    Custom(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
            Self::Pinned => "pinned",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "" | "open" => Self::Open,
            "in_progress" => Self::InProgress,
            "blocked" => Self::Blocked,
            "deferred" => Self::Deferred,
            "closed" => Self::Closed,
            "tombstone" => Self::Tombstone,
            "pinned" => Self::Pinned,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }

    /// Terminal statuses release `blocks`-family holds.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::InProgress)
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::Open
    }
}

impl From<String> for Status {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<Status> for String {
    fn from(value: Status) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for Status {
    fmt_as_str!();
}

/// Kind of work an issue represents.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum IssueType {
    Task,
    Bug,
    Feature,
    Epic,
    Chore,
    Docs,
    Question,
    Custom(String),
}

impl IssueType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Task => "task",
            Self::Bug => "bug",
            Self::Feature => "feature",
            Self::Epic => "epic",
            Self::Chore => "chore",
            Self::Docs => "docs",
            Self::Question => "question",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "" | "task" => Self::Task,
            "bug" => Self::Bug,
            "feature" => Self::Feature,
            "epic" => Self::Epic,
            "chore" => Self::Chore,
            "docs" => Self::Docs,
            "question" => Self::Question,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl Default for IssueType {
    fn default() -> Self {
        Self::Task
    }
}

impl From<String> for IssueType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<IssueType> for String {
    fn from(value: IssueType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for IssueType {
    fmt_as_str!();
}

/// Dependency edge type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum DepType {
    Blocks,
    ParentChild,
    ConditionalBlocks,
    WaitsFor,
    Related,
    DiscoveredFrom,
    RepliesTo,
    RelatesTo,
    Duplicates,
    Supersedes,
    CausedBy,
    Custom(String),
}

impl DepType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent-child",
            Self::ConditionalBlocks => "conditional-blocks",
            Self::WaitsFor => "waits-for",
            Self::Related => "related",
            Self::DiscoveredFrom => "discovered-from",
            Self::RepliesTo => "replies-to",
            Self::RelatesTo => "relates-to",
            Self::Duplicates => "duplicates",
            Self::Supersedes => "supersedes",
            Self::CausedBy => "caused-by",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "" | "blocks" => Self::Blocks,
            "parent-child" => Self::ParentChild,
            "conditional-blocks" => Self::ConditionalBlocks,
            "waits-for" => Self::WaitsFor,
            "related" => Self::Related,
            "discovered-from" => Self::DiscoveredFrom,
            "replies-to" => Self::RepliesTo,
            "relates-to" => Self::RelatesTo,
            "duplicates" => Self::Duplicates,
            "supersedes" => Self::Supersedes,
            "caused-by" => Self::CausedBy,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Whether this edge type participates in blocking and cycle checks.
    ///
    /// `parent-child` blocks only transitively (a blocked parent blocks its
    /// children) but belongs to the acyclic family.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ParentChild | Self::ConditionalBlocks | Self::WaitsFor
        )
    }

    pub fn is_builtin(&self) -> bool {
        !matches!(self, Self::Custom(_))
    }
}

impl Default for DepType {
    fn default() -> Self {
        Self::Blocks
    }
}

impl From<String> for DepType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DepType> for String {
    fn from(value: DepType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for DepType {
    fmt_as_str!();
}

/// Priority tier, 0 (most urgent) through 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const CRITICAL: Self = Self(0);
    pub const HIGH: Self = Self(1);
    pub const MEDIUM: Self = Self(2);
    pub const LOW: Self = Self(3);
    pub const BACKLOG: Self = Self(4);

    pub fn try_new(value: i64) -> Result<Self, DomainError> {
        if (0..=4).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(DomainError::PriorityOutOfRange { value })
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::MEDIUM
    }
}

/// A dependency edge: the holder (`issue_id`) depends on `depends_on_id`.
///
/// `depends_on_id` may be an external sentinel (`external:<project>:<cap>`),
/// for which no referential integrity is enforced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,
    pub depends_on_id: String,
    #[serde(rename = "type", default)]
    pub dep_type: DepType,
    #[serde(with = "rfc3339_ms")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: i64,
    pub issue_id: String,
    pub author: String,
    pub text: String,
    #[serde(with = "rfc3339_ms")]
    pub created_at: i64,
}

/// A work item plus its owned relations, in textual-mirror field order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    #[serde(skip)]
    pub content_hash: Option<String>,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceptance_criteria: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub issue_type: IssueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<i64>,
    #[serde(with = "rfc3339_ms")]
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(with = "rfc3339_ms")]
    pub updated_at: i64,
    #[serde(default, with = "rfc3339_ms_opt", skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_by_session: Option<String>,
    #[serde(default, with = "rfc3339_ms_opt", skip_serializing_if = "Option::is_none")]
    pub due_at: Option<i64>,
    #[serde(default, with = "rfc3339_ms_opt", skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_system: Option<String>,
    #[serde(default, with = "rfc3339_ms_opt", skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_type: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<Comment>,
}

impl Issue {
    /// A bare open issue; callers fill in content and relations.
    pub fn new(id: impl Into<String>, title: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            content_hash: None,
            title: title.into(),
            description: None,
            design: None,
            acceptance_criteria: None,
            notes: None,
            status: Status::Open,
            priority: Priority::default(),
            issue_type: IssueType::default(),
            assignee: None,
            owner: None,
            estimated_minutes: None,
            created_at: now_ms,
            created_by: None,
            updated_at: now_ms,
            closed_at: None,
            close_reason: None,
            closed_by_session: None,
            due_at: None,
            defer_until: None,
            external_ref: None,
            source_system: None,
            deleted_at: None,
            deleted_by: None,
            delete_reason: None,
            original_type: None,
            pinned: false,
            is_template: false,
            ephemeral: false,
            labels: Vec::new(),
            dependencies: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// Trim the title in place and check the field-level invariants.
    pub fn normalize_and_validate(&mut self) -> Result<(), DomainError> {
        self.title = validate_title(&self.title)?;
        if let Some(minutes) = self.estimated_minutes {
            if minutes < 0 {
                return Err(DomainError::NegativeEstimate { value: minutes });
            }
        }
        Priority::try_new(i64::from(self.priority.0))?;
        for label in &self.labels {
            validate_label(label)?;
        }
        for dep in &self.dependencies {
            if dep.issue_id == dep.depends_on_id {
                return Err(DomainError::SelfDependency {
                    id: dep.issue_id.clone(),
                });
            }
        }
        Ok(())
    }
}

pub fn validate_title(raw: &str) -> Result<String, DomainError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::EmptyTitle);
    }
    let len = trimmed.chars().count();
    if len > MAX_TITLE_CHARS {
        return Err(DomainError::TitleTooLong { len });
    }
    Ok(trimmed.to_string())
}

/// Validate a label for the normal AddLabel path: bounded length, and the
/// `provides:` namespace is reserved for a dedicated operation.
pub fn validate_label(label: &str) -> Result<(), DomainError> {
    let len = label.chars().count();
    if len == 0 || len > MAX_LABEL_CHARS {
        return Err(DomainError::LabelTooLong { len });
    }
    Ok(())
}

pub fn reject_reserved_label(label: &str) -> Result<(), DomainError> {
    if label.starts_with(RESERVED_LABEL_PREFIX) {
        return Err(DomainError::ReservedLabelNamespace {
            label: label.to_string(),
        });
    }
    Ok(())
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Audit record types. Open set: unknown values round-trip via `Custom`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventType {
    Created,
    Updated,
    StatusChanged,
    Closed,
    Reopened,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    CommentAdded,
    Deleted,
    Restored,
    Custom(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::StatusChanged => "status_changed",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::CommentAdded => "comment_added",
            Self::Deleted => "deleted",
            Self::Restored => "restored",
            Self::Custom(value) => value,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "status_changed" => Self::StatusChanged,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "comment_added" => Self::CommentAdded,
            "deleted" => Self::Deleted,
            "restored" => Self::Restored,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fmt_as_str!();
}

/// Immutable audit record attached to an issue.
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
    pub id: i64,
    pub issue_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_status_round_trips() {
        let status = Status::parse("triage");
        assert_eq!(status, Status::Custom("triage".to_string()));
        assert_eq!(status.as_str(), "triage");
        let json = serde_json::to_string(&status).expect("serialize");
        assert_eq!(json, "\"triage\"");
        let back: Status = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, status);
    }

    #[test]
    fn blocking_family_is_exactly_four_types() {
        for dep_type in [
            DepType::Blocks,
            DepType::ParentChild,
            DepType::ConditionalBlocks,
            DepType::WaitsFor,
        ] {
            assert!(dep_type.is_blocking(), "{dep_type} should block");
        }
        for dep_type in [
            DepType::Related,
            DepType::DiscoveredFrom,
            DepType::RepliesTo,
            DepType::RelatesTo,
            DepType::Duplicates,
            DepType::Supersedes,
            DepType::CausedBy,
            DepType::Custom("mirrors".to_string()),
        ] {
            assert!(!dep_type.is_blocking(), "{dep_type} should not block");
        }
    }

    #[test]
    fn title_is_trimmed_and_bounded() {
        assert_eq!(validate_title("  hello  ").expect("valid"), "hello");
        assert!(matches!(validate_title("   "), Err(DomainError::EmptyTitle)));
        let long = "x".repeat(501);
        assert!(matches!(
            validate_title(&long),
            Err(DomainError::TitleTooLong { len: 501 })
        ));
    }

    #[test]
    fn false_flags_and_empty_relations_are_omitted() {
        let issue = Issue::new("bd-1", "A", 1_722_600_000_000);
        let json = serde_json::to_string(&issue).expect("serialize");
        assert!(!json.contains("pinned"));
        assert!(!json.contains("labels"));
        assert!(!json.contains("content_hash"));
        assert!(json.contains("\"status\":\"open\""));
    }

    #[test]
    fn priority_bounds() {
        assert!(Priority::try_new(0).is_ok());
        assert!(Priority::try_new(4).is_ok());
        assert!(Priority::try_new(5).is_err());
        assert!(Priority::try_new(-1).is_err());
    }
}

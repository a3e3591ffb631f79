#![forbid(unsafe_code)]
//! Canonical content hash.
//!
//! SHA-256 over a fixed field sequence with NUL separators. Identity,
//! timestamps and bookkeeping fields are excluded, so two issues that agree
//! on substantive content hash equal regardless of when they were written.

use crate::model::Issue;
use sha2::{Digest, Sha256};

/// Compute the content hash of an issue together with its labels and
/// dependency triples (both taken from the embedded relation vectors).
pub fn content_hash(issue: &Issue) -> String {
    let mut hasher = Sha256::new();

    let mut field = |value: &str| {
        hasher_update(&mut hasher, value);
    };

    field(&issue.title);
    field(issue.description.as_deref().unwrap_or(""));
    field(issue.design.as_deref().unwrap_or(""));
    field(issue.acceptance_criteria.as_deref().unwrap_or(""));
    field(issue.notes.as_deref().unwrap_or(""));
    field(issue.status.as_str());
    field(&issue.priority.0.to_string());
    field(issue.issue_type.as_str());
    field(issue.assignee.as_deref().unwrap_or(""));
    field(issue.owner.as_deref().unwrap_or(""));
    field(issue.created_by.as_deref().unwrap_or(""));
    field(issue.external_ref.as_deref().unwrap_or(""));
    field(issue.source_system.as_deref().unwrap_or(""));
    field(issue.close_reason.as_deref().unwrap_or(""));
    field(issue.closed_by_session.as_deref().unwrap_or(""));
    field(issue.deleted_by.as_deref().unwrap_or(""));
    field(issue.delete_reason.as_deref().unwrap_or(""));
    field(issue.original_type.as_deref().unwrap_or(""));

    hasher.update([flag_byte(issue.pinned)]);
    hasher.update([flag_byte(issue.is_template)]);
    hasher.update([flag_byte(issue.ephemeral)]);
    hasher.update([0u8]);

    let mut labels: Vec<&str> = issue.labels.iter().map(String::as_str).collect();
    labels.sort_unstable();
    for label in labels {
        hasher_update(&mut hasher, label);
    }

    let mut triples: Vec<String> = issue
        .dependencies
        .iter()
        .map(|dep| {
            format!(
                "{}|{}|{}",
                dep.depends_on_id,
                dep.dep_type.as_str(),
                dep.metadata.as_deref().unwrap_or("")
            )
        })
        .collect();
    triples.sort_unstable();
    for triple in triples {
        hasher_update(&mut hasher, &triple);
    }

    hex(&hasher.finalize())
}

fn hasher_update(hasher: &mut Sha256, value: &str) {
    hasher.update(value.as_bytes());
    hasher.update([0u8]);
}

fn flag_byte(flag: bool) -> u8 {
    if flag {
        b'1'
    } else {
        b'0'
    }
}

pub fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(out, "{byte:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dependency, DepType, Issue};

    fn sample(now_ms: i64) -> Issue {
        let mut issue = Issue::new("bd-abc", "Fix the widget", now_ms);
        issue.description = Some("It wobbles".to_string());
        issue.labels = vec!["y".to_string(), "x".to_string()];
        issue
    }

    #[test]
    fn hash_is_independent_of_timestamps() {
        let a = sample(1_000);
        let mut b = sample(2_000);
        b.updated_at = 9_999;
        b.closed_at = None;
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_independent_of_id() {
        let a = sample(1_000);
        let mut b = sample(1_000);
        b.id = "bd-zzz".to_string();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn label_order_does_not_matter() {
        let a = sample(1_000);
        let mut b = sample(1_000);
        b.labels = vec!["x".to_string(), "y".to_string()];
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn substantive_fields_change_the_hash() {
        let a = sample(1_000);
        let mut b = sample(1_000);
        b.title = "Fix the other widget".to_string();
        assert_ne!(content_hash(&a), content_hash(&b));

        let mut c = sample(1_000);
        c.dependencies.push(Dependency {
            issue_id: "bd-abc".to_string(),
            depends_on_id: "bd-def".to_string(),
            dep_type: DepType::Blocks,
            created_at: 1_000,
            created_by: None,
            metadata: None,
            thread_id: None,
        });
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn empty_and_missing_optionals_hash_alike() {
        let a = sample(1_000);
        let mut b = sample(1_000);
        b.assignee = None;
        let mut c = sample(1_000);
        c.assignee = Some(String::new());
        assert_eq!(content_hash(&a), content_hash(&b));
        assert_eq!(content_hash(&b), content_hash(&c));
    }
}

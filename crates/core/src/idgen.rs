#![forbid(unsafe_code)]
//! Adaptive short-ID generation.
//!
//! IDs have the shape `<prefix>-<base36 hash>`, with the hash length chosen
//! so the birthday-paradox collision probability against the current issue
//! count stays under a configured ceiling. Children get dotted suffixes
//! (`bd-abc.1`) from an atomically incremented per-parent counter.

use crate::error::DomainError;
use sha2::{Digest, Sha256};

const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Hash length used when the configured range is exhausted.
pub const FALLBACK_HASH_LENGTH: usize = 16;

/// Hash length used when the probability computation itself fails.
pub const SAFE_HASH_LENGTH: usize = 6;

pub const MAX_NONCE: u64 = 9;

#[derive(Clone, Debug)]
pub struct IdConfig {
    pub prefix: String,
    pub min_length: usize,
    pub max_length: usize,
    pub max_collision_prob: f64,
    pub hierarchy_max_depth: usize,
}

impl IdConfig {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            min_length: 3,
            max_length: 8,
            max_collision_prob: 0.25,
            hierarchy_max_depth: 3,
        }
    }
}

/// Smallest hash length in `[min_length..=max_length]` whose estimated
/// collision probability against `existing_count` issues stays at or below
/// `max_collision_prob`. Returns `max_length` when no length qualifies and
/// [`SAFE_HASH_LENGTH`] when the estimate is not computable.
pub fn required_hash_length(existing_count: usize, cfg: &IdConfig) -> usize {
    let min = cfg.min_length.max(1);
    let max = cfg.max_length.max(min);
    for length in min..=max {
        match collision_probability(existing_count, length) {
            Some(p) if p <= cfg.max_collision_prob => return length,
            Some(_) => {}
            None => return SAFE_HASH_LENGTH,
        }
    }
    max
}

/// Birthday-paradox estimate: `1 - exp(-n(n-1) / (2 * 36^length))`.
pub fn collision_probability(existing_count: usize, length: usize) -> Option<f64> {
    let n = existing_count as f64;
    let capacity = 36f64.powi(i32::try_from(length).ok()?);
    if !capacity.is_finite() || capacity <= 0.0 {
        return None;
    }
    let exponent = -(n * (n - 1.0).max(0.0)) / (2.0 * capacity);
    let p = 1.0 - exponent.exp();
    if p.is_finite() {
        Some(p.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Deterministic hash portion for a new top-level ID.
pub fn hash_portion(
    title: &str,
    description: &str,
    creator: &str,
    created_at_ns: i128,
    nonce: u64,
    workspace_id: &str,
    length: usize,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"|");
    hasher.update(description.as_bytes());
    hasher.update(b"|");
    hasher.update(creator.as_bytes());
    hasher.update(b"|");
    hasher.update(created_at_ns.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(workspace_id.as_bytes());
    let digest = hasher.finalize();

    let mut value = u128::from_be_bytes(digest[..16].try_into().unwrap_or([0u8; 16]));
    let mut out = Vec::with_capacity(FALLBACK_HASH_LENGTH.max(length));
    while out.len() < length {
        out.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub fn compose_id(prefix: &str, hash: &str) -> String {
    format!("{prefix}-{hash}")
}

/// Next dotted child ID under `parent`, depth-checked.
pub fn child_id(parent: &str, next_child: i64, cfg: &IdConfig) -> Result<String, DomainError> {
    let id = format!("{parent}.{next_child}");
    if id_depth(&id) > cfg.hierarchy_max_depth {
        return Err(DomainError::HierarchyTooDeep {
            id,
            max: cfg.hierarchy_max_depth,
        });
    }
    Ok(id)
}

/// Split `<prefix>-<hash>` at the last dash. The hash portion may carry
/// dotted child suffixes but never a dash, so prefixes containing dashes
/// survive the split.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let (prefix, hash) = id.rsplit_once('-')?;
    if prefix.is_empty() || hash.is_empty() {
        return None;
    }
    Some((prefix, hash))
}

/// Parent of a dotted child ID: the portion before the last dot that
/// precedes a purely numeric suffix. `bd-a.b.2` → `bd-a.b`; `v1.2-abc` has
/// no numeric suffix after a dot in the hash portion and is a root.
pub fn parent_of(id: &str) -> Option<&str> {
    let (_, hash) = split_id(id)?;
    let (head, tail) = id.rsplit_once('.')?;
    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // A dot inside the prefix must not fabricate a parent.
    if !hash.contains('.') {
        return None;
    }
    Some(head)
}

/// Hierarchy depth: 1 for a root, +1 per dotted child segment.
pub fn id_depth(id: &str) -> usize {
    let mut depth = 1;
    let mut current = id;
    while let Some(parent) = parent_of(current) {
        depth += 1;
        current = parent;
    }
    depth
}

pub fn is_valid_id_format(id: &str) -> bool {
    if split_id(id).is_none() {
        return false;
    }
    id.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_'))
}

pub fn validate_explicit_id(id: &str, expected_prefix: &str) -> Result<(), DomainError> {
    if !is_valid_id_format(id) {
        return Err(DomainError::InvalidIdFormat {
            value: id.to_string(),
        });
    }
    match split_id(id) {
        Some((prefix, _)) if prefix == expected_prefix => Ok(()),
        _ => Err(DomainError::InvalidIdFormat {
            value: id.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_grows_with_issue_count() {
        let cfg = IdConfig::new("bd");
        assert_eq!(required_hash_length(0, &cfg), 3);
        assert!(required_hash_length(10_000, &cfg) >= required_hash_length(100, &cfg));
    }

    #[test]
    fn ten_thousand_issues_need_at_least_six_chars() {
        // ceil(log36(N^2 / 2p)) with N=10_000, p=0.25 is 6.
        let cfg = IdConfig::new("bd");
        assert!(required_hash_length(10_000, &cfg) >= 6);
    }

    #[test]
    fn hash_portion_determinism() {
        let a = hash_portion("t", "d", "me", 42, 0, "ws", 6);
        let b = hash_portion("t", "d", "me", 42, 0, "ws", 6);
        let c = hash_portion("t", "d", "me", 42, 1, "ws", 6);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 6);
        assert!(a.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn child_ids_and_depth() {
        let cfg = IdConfig::new("bd");
        let child = child_id("bd-abc", 1, &cfg).expect("child");
        assert_eq!(child, "bd-abc.1");
        let grand = child_id(&child, 2, &cfg).expect("grandchild");
        assert_eq!(grand, "bd-abc.1.2");
        assert_eq!(id_depth(&grand), 3);
        assert!(child_id(&grand, 1, &cfg).is_err(), "depth 4 exceeds default");
    }

    #[test]
    fn parent_detection_respects_dots_in_prefixes() {
        assert_eq!(parent_of("bd-abc.1"), Some("bd-abc"));
        assert_eq!(parent_of("bd-abc"), None);
        // Prefix contains a dot; hash portion does not: still a root.
        assert_eq!(parent_of("v1.2-abc"), None);
        // Non-numeric suffix after the dot is part of the hash, not a child.
        assert_eq!(parent_of("bd-abc.x"), None);
    }

    #[test]
    fn split_keeps_dashed_prefixes_whole() {
        assert_eq!(split_id("my-app-x7k2"), Some(("my-app", "x7k2")));
        assert_eq!(split_id("nodash"), None);
    }

    #[test]
    fn explicit_id_validation() {
        assert!(validate_explicit_id("bd-abc123", "bd").is_ok());
        assert!(validate_explicit_id("other-abc", "bd").is_err());
        assert!(validate_explicit_id("bd-", "bd").is_err());
        assert!(validate_explicit_id("bd-abc def", "bd").is_err());
    }
}

#![forbid(unsafe_code)]
//! Blocking-semantics classification.
//!
//! Pure rules only: which close reasons count as failure for
//! `conditional-blocks`, how `waits-for` gates are declared in edge
//! metadata, and the shape of external sentinels. The storage crate
//! materializes these rules into the blocked cache.

use crate::error::DomainError;

/// ASCII case-insensitive substring markers that make a close count as a
/// failure for `conditional-blocks` edges.
pub const FAILURE_KEYWORDS: &[&str] = &[
    "failed",
    "rejected",
    "wontfix",
    "won't fix",
    "cancelled",
    "canceled",
    "abandoned",
    "blocked",
    "error",
    "timeout",
    "aborted",
];

pub fn close_reason_indicates_failure(reason: &str) -> bool {
    let lowered = reason.to_ascii_lowercase();
    FAILURE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Gate declared in `waits-for` edge metadata.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    AllChildren,
    AnyChildren,
}

impl Default for Gate {
    fn default() -> Self {
        Self::AllChildren
    }
}

/// Parse `{"gate": "..."}` out of opaque edge metadata. Anything that is
/// not a recognizable declaration falls back to the default gate.
pub fn parse_gate(metadata: Option<&str>) -> Gate {
    let Some(raw) = metadata else {
        return Gate::default();
    };
    let Ok(value) = serde_json::from_str::<serde_json::Value>(raw) else {
        return Gate::default();
    };
    match value.get("gate").and_then(|g| g.as_str()) {
        Some("any-children") => Gate::AnyChildren,
        _ => Gate::default(),
    }
}

pub const EXTERNAL_SENTINEL_PREFIX: &str = "external:";

/// A dependency target of the form `external:<project>:<capability>`,
/// resolved against a foreign workspace via the `provides:<capability>`
/// label convention.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalSentinel {
    pub project: String,
    pub capability: String,
}

impl ExternalSentinel {
    pub fn parse(value: &str) -> Result<Self, DomainError> {
        let rest = value
            .strip_prefix(EXTERNAL_SENTINEL_PREFIX)
            .ok_or_else(|| malformed(value))?;
        let (project, capability) = rest.split_once(':').ok_or_else(|| malformed(value))?;
        if project.is_empty() || capability.is_empty() || capability.contains(':') {
            return Err(malformed(value));
        }
        Ok(Self {
            project: project.to_string(),
            capability: capability.to_string(),
        })
    }

    /// The label a satisfying issue carries in the external project.
    pub fn provides_label(&self) -> String {
        format!("provides:{}", self.capability)
    }
}

pub fn is_external_sentinel(value: &str) -> bool {
    value.starts_with(EXTERNAL_SENTINEL_PREFIX)
}

fn malformed(value: &str) -> DomainError {
    DomainError::MalformedSentinel {
        value: value.to_string(),
    }
}

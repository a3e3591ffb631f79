#![forbid(unsafe_code)]

use braid_core::DomainError;
use std::path::PathBuf;

/// Storage-layer error with a stable kind tag.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sql(rusqlite::Error),
    Domain(DomainError),
    NotFound {
        id: String,
    },
    AmbiguousId {
        input: String,
        candidates: Vec<String>,
    },
    Validation(String),
    CycleDetected {
        from: String,
        to: String,
        path: Vec<String>,
    },
    Conflict(String),
    PrefixMismatch {
        id: String,
        allowed: Vec<String>,
    },
    CorruptInput {
        path: PathBuf,
        line: Option<u64>,
        reason: String,
    },
    PathUnsafe {
        path: PathBuf,
        reason: &'static str,
    },
    Locked,
    Schema(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) | Self::Sql(_) => "IO",
            Self::Domain(_) | Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::AmbiguousId { .. } => "AMBIGUOUS_ID",
            Self::CycleDetected { .. } => "CYCLE_DETECTED",
            Self::Conflict(_) => "CONFLICT",
            Self::PrefixMismatch { .. } => "PREFIX_MISMATCH",
            Self::CorruptInput { .. } => "CORRUPT_INPUT",
            Self::PathUnsafe { .. } => "PATH_UNSAFE",
            Self::Locked => "LOCKED",
            Self::Schema(_) => "SCHEMA",
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io: {err}"),
            Self::Sql(err) => write!(f, "sqlite: {err}"),
            Self::Domain(err) => write!(f, "{err}"),
            Self::NotFound { id } => write!(f, "issue not found: {id}"),
            Self::AmbiguousId { input, candidates } => {
                write!(f, "ambiguous id '{input}': matches {}", candidates.join(", "))
            }
            Self::Validation(message) => write!(f, "{message}"),
            Self::CycleDetected { from, to, path } => {
                write!(
                    f,
                    "dependency {from} -> {to} would create a cycle ({})",
                    path.join(" -> ")
                )
            }
            Self::Conflict(message) => write!(f, "conflict: {message}"),
            Self::PrefixMismatch { id, allowed } => {
                write!(
                    f,
                    "record {id} is outside allowed prefixes [{}]",
                    allowed.join(", ")
                )
            }
            Self::CorruptInput { path, line, reason } => match line {
                Some(line) => {
                    write!(f, "corrupt input {}:{line}: {reason}", path.display())
                }
                None => write!(f, "corrupt input {}: {reason}", path.display()),
            },
            Self::PathUnsafe { path, reason } => {
                write!(f, "unsafe path {}: {reason}", path.display())
            }
            Self::Locked => write!(f, "database busy beyond backoff budget"),
            Self::Schema(message) => write!(f, "schema: {message}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        if is_busy(&value) {
            return Self::Locked;
        }
        if let rusqlite::Error::SqliteFailure(_, Some(message)) = &value {
            if message.contains("no such table") || message.contains("no such column") {
                return Self::Schema(message.clone());
            }
        }
        Self::Sql(value)
    }
}

impl From<DomainError> for StoreError {
    fn from(value: DomainError) -> Self {
        Self::Domain(value)
    }
}

pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ffi::ErrorCode::DatabaseBusy
                    | rusqlite::ffi::ErrorCode::DatabaseLocked,
                ..
            },
            _,
        )
    )
}

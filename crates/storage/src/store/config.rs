#![forbid(unsafe_code)]
//! Runtime configuration: environment-carried knobs plus the persisted
//! `config` table (issue prefix, custom value sets, sort policy).

use super::{OrphanHandling, ReadySortPolicy, SqliteStore, StoreError};
use braid_core::idgen::IdConfig;
use braid_core::model::{IssueType, Status};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;

pub const ENV_WORKSPACE_DIR: &str = "BRAID_WORKSPACE_DIR";
pub const ENV_MAX_COLLISION_PROB: &str = "BRAID_MAX_COLLISION_PROB";
pub const ENV_MIN_HASH_LENGTH: &str = "BRAID_MIN_HASH_LENGTH";
pub const ENV_MAX_HASH_LENGTH: &str = "BRAID_MAX_HASH_LENGTH";
pub const ENV_HIERARCHY_MAX_DEPTH: &str = "BRAID_HIERARCHY_MAX_DEPTH";
pub const ENV_ORPHAN_HANDLING: &str = "BRAID_ORPHAN_HANDLING";
pub const ENV_ALLOWED_PREFIXES: &str = "BRAID_ALLOWED_PREFIXES";

pub const CONFIG_ISSUE_PREFIX: &str = "issue_prefix";
pub const CONFIG_CUSTOM_STATUSES: &str = "custom_statuses";
pub const CONFIG_CUSTOM_TYPES: &str = "custom_types";
pub const CONFIG_READY_SORT: &str = "ready_sort";

/// Environment-carried configuration consumed by the core.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub workspace_dir: Option<PathBuf>,
    pub max_collision_prob: f64,
    pub min_hash_length: usize,
    pub max_hash_length: usize,
    pub hierarchy_max_depth: usize,
    pub orphan_handling: OrphanHandling,
    /// Additional prefixes accepted on import next to the workspace's own.
    pub allowed_prefixes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            max_collision_prob: 0.25,
            min_hash_length: 3,
            max_hash_length: 8,
            hierarchy_max_depth: 3,
            orphan_handling: OrphanHandling::default(),
            allowed_prefixes: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(dir) = env_var(ENV_WORKSPACE_DIR) {
            cfg.workspace_dir = Some(PathBuf::from(dir));
        }
        if let Some(value) = env_var(ENV_MAX_COLLISION_PROB).and_then(|v| v.parse::<f64>().ok()) {
            if value.is_finite() && value > 0.0 && value < 1.0 {
                cfg.max_collision_prob = value;
            }
        }
        if let Some(value) = env_var(ENV_MIN_HASH_LENGTH).and_then(|v| v.parse::<usize>().ok()) {
            if value >= 1 {
                cfg.min_hash_length = value;
            }
        }
        if let Some(value) = env_var(ENV_MAX_HASH_LENGTH).and_then(|v| v.parse::<usize>().ok()) {
            if value >= cfg.min_hash_length {
                cfg.max_hash_length = value;
            }
        }
        if let Some(value) = env_var(ENV_HIERARCHY_MAX_DEPTH).and_then(|v| v.parse::<usize>().ok())
        {
            if value >= 1 {
                cfg.hierarchy_max_depth = value;
            }
        }
        if let Some(value) = env_var(ENV_ORPHAN_HANDLING).and_then(|v| OrphanHandling::parse(&v)) {
            cfg.orphan_handling = value;
        }
        if let Some(value) = env_var(ENV_ALLOWED_PREFIXES) {
            cfg.allowed_prefixes = split_csv(&value);
        }
        cfg
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl SqliteStore {
    pub fn get_config(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    pub fn set_config(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO config(key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn delete_config(&mut self, key: &str) -> Result<bool, StoreError> {
        let rows = self
            .conn
            .execute("DELETE FROM config WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    pub fn get_all_config(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM config")?;
        let mut rows = stmt.query([])?;
        let mut out = HashMap::new();
        while let Some(row) = rows.next()? {
            out.insert(row.get::<_, String>(0)?, row.get::<_, String>(1)?);
        }
        Ok(out)
    }

    /// The workspace's issue prefix. Bootstrapped at open time, so absence
    /// indicates a schema-level problem.
    pub fn issue_prefix(&self) -> Result<String, StoreError> {
        self.get_config(CONFIG_ISSUE_PREFIX)?
            .ok_or_else(|| StoreError::Schema("issue_prefix is not configured".to_string()))
    }

    pub(crate) fn id_config(&self) -> Result<IdConfig, StoreError> {
        let mut cfg = IdConfig::new(self.issue_prefix()?);
        cfg.min_length = self.engine.min_hash_length;
        cfg.max_length = self.engine.max_hash_length;
        cfg.max_collision_prob = self.engine.max_collision_prob;
        cfg.hierarchy_max_depth = self.engine.hierarchy_max_depth;
        Ok(cfg)
    }

    pub fn ready_sort_policy(&self) -> Result<ReadySortPolicy, StoreError> {
        Ok(self
            .get_config(CONFIG_READY_SORT)?
            .map(|v| ReadySortPolicy::parse(&v))
            .unwrap_or_default())
    }

    /// Workspace-declared custom statuses, beyond the built-in set.
    pub fn custom_statuses(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .get_config(CONFIG_CUSTOM_STATUSES)?
            .map(|v| split_csv(&v))
            .unwrap_or_default())
    }

    pub fn custom_types(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .get_config(CONFIG_CUSTOM_TYPES)?
            .map(|v| split_csv(&v))
            .unwrap_or_default())
    }

    /// Write-path validation: built-in or workspace-declared. Import never
    /// calls this; unknown values round-trip untouched there.
    pub(crate) fn validate_status(&self, status: &Status) -> Result<(), StoreError> {
        if status.is_builtin() || self.custom_statuses()?.iter().any(|s| s == status.as_str()) {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "unknown status '{status}' (declare it in {CONFIG_CUSTOM_STATUSES})"
            )))
        }
    }

    pub(crate) fn validate_issue_type(&self, issue_type: &IssueType) -> Result<(), StoreError> {
        if issue_type.is_builtin()
            || self.custom_types()?.iter().any(|t| t == issue_type.as_str())
        {
            Ok(())
        } else {
            Err(StoreError::Validation(format!(
                "unknown issue type '{issue_type}' (declare it in {CONFIG_CUSTOM_TYPES})"
            )))
        }
    }
}

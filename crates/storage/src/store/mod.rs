#![forbid(unsafe_code)]
//! Storage implementation (split-friendly module root).

mod blocked;
mod comments;
mod config;
mod cycles;
mod deps;
mod dirty;
mod error;
mod events;
mod export;
mod import;
mod issues;
mod labels;
mod lock;
mod meta;
mod paths;
mod resolve;
mod support;
mod tree;
mod types;

use braid_core::model::EventType;
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection, Transaction};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use config::EngineConfig;
pub use error::StoreError;
pub use lock::SyncLock;
pub use meta::{
    META_JSONL_CONTENT_HASH, META_JSONL_FILE_HASH, META_LAST_EXPORT_TIME, META_LAST_IMPORT_TIME,
    META_SCHEMA_VERSION, META_WORKSPACE_ID,
};
pub use types::*;

use support::{immediate_tx, migrate_schema};

pub const DB_FILE: &str = "beads.db";
pub const MIRROR_FILE: &str = "issues.jsonl";
pub const SYNC_LOCK_FILE: &str = ".sync.lock";

/// Accepted fallback mirror names, probed in order after [`MIRROR_FILE`].
pub const MIRROR_FALLBACK_FILES: &[&str] = &["beads.jsonl"];

/// Never selected by discovery: merge scratch files and sidecar logs.
pub const MIRROR_EXCLUDED_FILES: &[&str] = &[
    "deletions.jsonl",
    "interactions.jsonl",
    "beads.base.jsonl",
    "beads.left.jsonl",
    "beads.right.jsonl",
];

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct SqliteStore {
    workspace_dir: PathBuf,
    conn: Connection,
    engine: EngineConfig,
}

impl SqliteStore {
    /// Open (creating if needed) the store in `workspace_dir`, with
    /// configuration taken from the environment.
    pub fn open(workspace_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with(workspace_dir, EngineConfig::from_env())
    }

    pub fn open_with(
        workspace_dir: impl AsRef<Path>,
        engine: EngineConfig,
    ) -> Result<Self, StoreError> {
        let workspace_dir = workspace_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&workspace_dir)?;
        let conn = Connection::open(workspace_dir.join(DB_FILE))?;
        apply_pragmas(&conn, false)?;
        migrate_schema(&conn)?;
        let mut store = Self {
            workspace_dir,
            conn,
            engine,
        };
        store.bootstrap_identity()?;
        Ok(store)
    }

    /// In-memory store for tests; mirror operations still target
    /// `workspace_dir` on disk.
    pub fn open_memory(workspace_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn, true)?;
        migrate_schema(&conn)?;
        let mut store = Self {
            workspace_dir: workspace_dir.as_ref().to_path_buf(),
            conn,
            engine: EngineConfig::default(),
        };
        store.bootstrap_identity()?;
        Ok(store)
    }

    pub fn workspace_dir(&self) -> &Path {
        &self.workspace_dir
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Canonical mirror location: `issues.jsonl`, falling back to accepted
    /// alternates that already exist. Scratch files are never selected.
    pub fn mirror_path(&self) -> PathBuf {
        let preferred = self.workspace_dir.join(MIRROR_FILE);
        if preferred.exists() {
            return preferred;
        }
        for name in MIRROR_FALLBACK_FILES {
            let candidate = self.workspace_dir.join(name);
            if candidate.exists() {
                return candidate;
            }
        }
        preferred
    }

    pub fn count_issues(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT count(*) FROM issues", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn id_exists(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self
            .conn
            .prepare("SELECT 1 FROM issues WHERE id = ?1")?
            .exists(params![id])?)
    }

    /// Run a mutation under the store's transaction protocol: immediate
    /// lock, caller changes, event append, dirty marks, blocked-cache
    /// refresh, commit. On any error nothing escapes the rollback.
    pub fn mutate<F, R>(&mut self, actor: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Transaction<'_>, &mut MutationContext) -> Result<R, StoreError>,
    {
        let tx = immediate_tx(&mut self.conn)?;
        let mut ctx = MutationContext::new(actor);

        let result = f(&tx, &mut ctx)?;

        let now = now_ms();
        for event in &ctx.events {
            events::insert_event_tx(&tx, event, now)?;
        }
        for id in &ctx.dirty_ids {
            dirty::mark_dirty_tx(&tx, id, now)?;
        }
        if ctx.refresh_blocked_cache {
            blocked::rebuild_blocked_cache_tx(&tx)?;
        }

        tx.commit()?;
        Ok(result)
    }
}

fn apply_pragmas(conn: &Connection, in_memory: bool) -> Result<(), StoreError> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    if !in_memory {
        // WAL needs filesystem support; fall back to rollback journaling.
        let mode: Result<String, _> =
            conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0));
        match mode {
            Ok(mode) if mode.eq_ignore_ascii_case("wal") => {}
            _ => tracing::debug!("WAL unavailable, using rollback journal"),
        }
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "cache_size", -65_536)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}

/// Side effects gathered while a mutation closure runs; flushed in the same
/// transaction just before commit.
pub struct MutationContext {
    actor: String,
    events: Vec<PendingEvent>,
    dirty_ids: BTreeSet<String>,
    refresh_blocked_cache: bool,
}

pub(crate) struct PendingEvent {
    pub issue_id: String,
    pub event_type: EventType,
    pub actor: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub comment: Option<String>,
}

impl MutationContext {
    fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            events: Vec::new(),
            dirty_ids: BTreeSet::new(),
            refresh_blocked_cache: false,
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn record_event(&mut self, event_type: EventType, issue_id: &str, comment: Option<String>) {
        self.record_change(event_type, issue_id, None, None, comment);
    }

    pub fn record_change(
        &mut self,
        event_type: EventType,
        issue_id: &str,
        old_value: Option<String>,
        new_value: Option<String>,
        comment: Option<String>,
    ) {
        self.events.push(PendingEvent {
            issue_id: issue_id.to_string(),
            event_type,
            actor: self.actor.clone(),
            old_value,
            new_value,
            comment,
        });
    }

    pub fn mark_dirty(&mut self, issue_id: &str) {
        self.dirty_ids.insert(issue_id.to_string());
    }

    pub fn refresh_cache(&mut self) {
        self.refresh_blocked_cache = true;
    }
}

#![forbid(unsafe_code)]
//! Schema and forward-only migrations.
//!
//! Migrations are numbered, applied in ascending order, each inside its own
//! transaction, and recorded in `schema_migrations`. A recorded version is
//! never re-run; no migration removes or rewrites data a prior invariant
//! depends on.

use super::super::error::StoreError;
use braid_core::timefmt::now_ms;
use rusqlite::{params, Connection};

pub(crate) const SCHEMA_VERSION: i64 = 3;

const MIGRATIONS: &[(i64, &str)] = &[(1, CORE_TABLES), (2, INDEXES), (3, GRAPH_CACHES)];

const CORE_TABLES: &str = r#"
    CREATE TABLE IF NOT EXISTS issues (
      id TEXT PRIMARY KEY,
      content_hash TEXT,
      title TEXT NOT NULL CHECK (length(trim(title)) BETWEEN 1 AND 500),
      description TEXT,
      design TEXT,
      acceptance_criteria TEXT,
      notes TEXT,
      status TEXT NOT NULL DEFAULT 'open',
      priority INTEGER NOT NULL DEFAULT 2 CHECK (priority BETWEEN 0 AND 4),
      issue_type TEXT NOT NULL DEFAULT 'task',
      assignee TEXT,
      owner TEXT,
      created_by TEXT,
      estimated_minutes INTEGER CHECK (estimated_minutes IS NULL OR estimated_minutes >= 0),
      created_at_ms INTEGER NOT NULL,
      updated_at_ms INTEGER NOT NULL,
      closed_at_ms INTEGER,
      close_reason TEXT,
      closed_by_session TEXT,
      due_at_ms INTEGER,
      defer_until_ms INTEGER,
      external_ref TEXT,
      source_system TEXT,
      deleted_at_ms INTEGER,
      deleted_by TEXT,
      delete_reason TEXT,
      original_type TEXT,
      ephemeral INTEGER NOT NULL DEFAULT 0,
      pinned INTEGER NOT NULL DEFAULT 0,
      is_template INTEGER NOT NULL DEFAULT 0,
      CHECK (
        (status = 'closed' AND closed_at_ms IS NOT NULL)
        OR (status = 'tombstone')
        OR (status NOT IN ('closed', 'tombstone') AND closed_at_ms IS NULL)
      )
    );

    CREATE TABLE IF NOT EXISTS dependencies (
      issue_id TEXT NOT NULL,
      depends_on_id TEXT NOT NULL,
      type TEXT NOT NULL DEFAULT 'blocks',
      created_at_ms INTEGER NOT NULL,
      created_by TEXT,
      metadata TEXT,
      thread_id TEXT,
      PRIMARY KEY (issue_id, depends_on_id),
      CHECK (issue_id <> depends_on_id),
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
      -- depends_on_id carries no foreign key: external sentinels are legal targets.
    );

    CREATE TABLE IF NOT EXISTS labels (
      issue_id TEXT NOT NULL,
      label TEXT NOT NULL CHECK (length(label) <= 100),
      PRIMARY KEY (issue_id, label),
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS comments (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      issue_id TEXT NOT NULL,
      author TEXT NOT NULL,
      text TEXT NOT NULL,
      created_at_ms INTEGER NOT NULL,
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS events (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      issue_id TEXT NOT NULL,
      event_type TEXT NOT NULL,
      actor TEXT NOT NULL DEFAULT '',
      old_value TEXT,
      new_value TEXT,
      comment TEXT,
      created_at_ms INTEGER NOT NULL,
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS config (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS metadata (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS dirty_issues (
      issue_id TEXT PRIMARY KEY,
      marked_at_ms INTEGER NOT NULL,
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS export_hashes (
      issue_id TEXT PRIMARY KEY,
      content_hash TEXT NOT NULL,
      exported_at_ms INTEGER NOT NULL,
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );
"#;

const INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status);
    CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority);
    CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type);
    CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee) WHERE assignee IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_issues_created_at ON issues(created_at_ms);
    CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at_ms);
    CREATE INDEX IF NOT EXISTS idx_issues_content_hash ON issues(content_hash);

    CREATE UNIQUE INDEX IF NOT EXISTS idx_issues_external_ref_unique
        ON issues(external_ref) WHERE external_ref IS NOT NULL AND external_ref <> '';

    CREATE INDEX IF NOT EXISTS idx_issues_ephemeral ON issues(ephemeral) WHERE ephemeral = 1;
    CREATE INDEX IF NOT EXISTS idx_issues_pinned ON issues(pinned) WHERE pinned = 1;
    CREATE INDEX IF NOT EXISTS idx_issues_tombstone ON issues(status) WHERE status = 'tombstone';

    CREATE INDEX IF NOT EXISTS idx_issues_ready
        ON issues(status, priority, created_at_ms)
        WHERE status IN ('open', 'in_progress')
        AND ephemeral = 0
        AND pinned = 0;

    CREATE INDEX IF NOT EXISTS idx_dependencies_issue_id ON dependencies(issue_id);
    CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_id ON dependencies(depends_on_id);
    CREATE INDEX IF NOT EXISTS idx_dependencies_type ON dependencies(type);

    CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label);
    CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id);
    CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id);
    CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at_ms);
    CREATE INDEX IF NOT EXISTS idx_dirty_issues_marked_at ON dirty_issues(marked_at_ms);
"#;

const GRAPH_CACHES: &str = r#"
    CREATE TABLE IF NOT EXISTS blocked_issues_cache (
      issue_id TEXT PRIMARY KEY,
      blocked_by TEXT NOT NULL,
      blocked_at_ms INTEGER NOT NULL,
      FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS child_counters (
      parent_id TEXT PRIMARY KEY,
      last_child INTEGER NOT NULL DEFAULT 0,
      FOREIGN KEY (parent_id) REFERENCES issues(id) ON DELETE CASCADE
    );
"#;

pub(crate) fn migrate_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
           version INTEGER PRIMARY KEY,
           applied_at_ms INTEGER NOT NULL
         );",
    )?;

    for (version, sql) in MIGRATIONS {
        apply_migration(conn, *version, sql)?;
    }
    Ok(())
}

fn apply_migration(conn: &Connection, version: i64, sql: &str) -> Result<(), StoreError> {
    let applied: bool = conn
        .prepare("SELECT 1 FROM schema_migrations WHERE version = ?1")?
        .exists(params![version])?;
    if applied {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(sql)?;
    tx.execute(
        "INSERT INTO schema_migrations(version, applied_at_ms) VALUES (?1, ?2)",
        params![version, now_ms()],
    )?;
    tx.commit()?;
    Ok(())
}

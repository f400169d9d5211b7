//! SQL migration definitions for the MediaLens state database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its version in `schema_migrations` so reopening is a no-op.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: cursors, window_cache",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One progress marker per cursor stage
CREATE TABLE IF NOT EXISTS cursors (
    stage          TEXT PRIMARY KEY,
    position       TEXT NOT NULL,
    revision       INTEGER NOT NULL,
    schema_version INTEGER NOT NULL,
    updated_at     TEXT NOT NULL
);

-- Merged content of CLOSED windows
CREATE TABLE IF NOT EXISTS window_cache (
    window_key   TEXT PRIMARY KEY,
    policy       TEXT NOT NULL,
    content_json TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    computed_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run registry and per-stage writer locks",
            sql: r#"
CREATE TABLE IF NOT EXISTS runs (
    run_id         TEXT PRIMARY KEY,
    steps_json     TEXT NOT NULL,
    completed_json TEXT NOT NULL DEFAULT '[]',
    state          TEXT NOT NULL,
    last_stage     TEXT,
    last_position  TEXT,
    error          TEXT,
    stop_requested INTEGER NOT NULL DEFAULT 0,
    started_at     TEXT NOT NULL,
    finished_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);

CREATE TABLE IF NOT EXISTS stage_locks (
    stage       TEXT PRIMARY KEY,
    run_id      TEXT NOT NULL,
    acquired_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

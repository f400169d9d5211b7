//! libSQL state database and artifact storage for MediaLens.
//!
//! The [`Storage`] struct wraps a libSQL database holding the pipeline's shared
//! mutable state: per-stage cursors, the closed-window cache, the run registry
//! and per-stage writer locks. Job artifacts live outside the database behind
//! the [`StorageAdapter`] trait.
//!
//! **Access rules:**
//! - Pipeline runs: read-write via [`Storage::open`]
//! - Status queries: read-only via [`Storage::open_readonly`]

mod adapter;
mod migrations;

use std::path::Path;

use chrono::{DateTime, Utc};
use libsql::{Connection, Database, Row, params};
use medialens_shared::{
    CURRENT_SCHEMA_VERSION, CursorRecord, JobKey, MediaLensError, Policy, Result, RunRecord,
    RunState, Step, WindowKey,
};
use sha2::{Digest, Sha256};

pub use adapter::{Entry, LocalStorage, StorageAdapter, StorageAdapterExt, join_path};

fn db_err(e: libsql::Error) -> MediaLensError {
    MediaLensError::Storage(e.to_string())
}

fn corrupted(what: impl std::fmt::Display) -> MediaLensError {
    MediaLensError::Corrupted {
        what: what.to_string(),
    }
}

fn parse_time(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupted(format!("{column} '{raw}': {e}")))
}

/// SHA-256 of `content`, hex encoded.
pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// A cached CLOSED window record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedWindow {
    pub window_key: WindowKey,
    pub policy: Policy,
    pub content_json: String,
    pub content_hash: String,
    pub computed_at: DateTime<Utc>,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MediaLensError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` for status queries only.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MediaLensError::not_found(format!(
                "state database {}",
                path.display()
            )));
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    MediaLensError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0,
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(MediaLensError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cursors
    // -----------------------------------------------------------------------

    /// Read the cursor record for `stage`.
    pub async fn get_cursor(&self, stage: Step) -> Result<Option<CursorRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, position, revision, schema_version, updated_at
                 FROM cursors WHERE stage = ?1",
                params![stage.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_cursor(&row)?)),
            None => Ok(None),
        }
    }

    /// All cursor records, ordered by stage name.
    pub async fn list_cursors(&self) -> Result<Vec<CursorRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, position, revision, schema_version, updated_at
                 FROM cursors ORDER BY stage",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut cursors = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            cursors.push(row_to_cursor(&row)?);
        }
        Ok(cursors)
    }

    /// Write a cursor position with compare-and-swap on the revision.
    ///
    /// `expected_revision` is the revision the caller read, or `None` if it saw no
    /// record. If another writer got there first the write is refused with
    /// [`MediaLensError::ConcurrentWrite`].
    pub async fn put_cursor(
        &self,
        stage: Step,
        position: JobKey,
        expected_revision: Option<u64>,
    ) -> Result<CursorRecord> {
        self.check_writable()?;
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let position_str = position.to_string();

        let (affected, revision) = match expected_revision {
            None => {
                let affected = self
                    .conn
                    .execute(
                        "INSERT OR IGNORE INTO cursors
                           (stage, position, revision, schema_version, updated_at)
                         VALUES (?1, ?2, 1, ?3, ?4)",
                        params![
                            stage.as_str(),
                            position_str.as_str(),
                            CURRENT_SCHEMA_VERSION,
                            now_str.as_str()
                        ],
                    )
                    .await
                    .map_err(db_err)?;
                (affected, 1)
            }
            Some(expected) => {
                let next = expected + 1;
                let affected = self
                    .conn
                    .execute(
                        "UPDATE cursors
                         SET position = ?1, revision = ?2, schema_version = ?3, updated_at = ?4
                         WHERE stage = ?5 AND revision = ?6",
                        params![
                            position_str.as_str(),
                            next as i64,
                            CURRENT_SCHEMA_VERSION,
                            now_str.as_str(),
                            stage.as_str(),
                            expected as i64
                        ],
                    )
                    .await
                    .map_err(db_err)?;
                (affected, next)
            }
        };

        if affected == 0 {
            return Err(MediaLensError::ConcurrentWrite {
                stage: stage.as_str().into(),
            });
        }

        tracing::debug!(stage = %stage, position = %position, revision, "cursor written");
        Ok(CursorRecord {
            schema_version: CURRENT_SCHEMA_VERSION,
            stage,
            position,
            revision,
            updated_at: now,
        })
    }

    /// Remove the cursor for `stage`. Returns whether a record existed.
    pub async fn delete_cursor(&self, stage: Step) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "DELETE FROM cursors WHERE stage = ?1",
                params![stage.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Closed-window cache
    // -----------------------------------------------------------------------

    /// Read a cached window, verifying its content hash.
    pub async fn get_window_cache(&self, key: &WindowKey) -> Result<Option<CachedWindow>> {
        let key_str = key.to_string();
        let mut rows = self
            .conn
            .query(
                "SELECT policy, content_json, content_hash, computed_at
                 FROM window_cache WHERE window_key = ?1",
                params![key_str.as_str()],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };

        let policy: String = row.get(0).map_err(db_err)?;
        let policy = match policy.as_str() {
            "iso" => Policy::Iso,
            "rolling" => Policy::Rolling,
            other => return Err(corrupted(format!("window {key_str} has policy '{other}'"))),
        };
        let content_json: String = row.get(1).map_err(db_err)?;
        let stored_hash: String = row.get(2).map_err(db_err)?;
        let computed_at: String = row.get(3).map_err(db_err)?;

        if content_hash(&content_json) != stored_hash {
            return Err(corrupted(format!("window {key_str} content hash mismatch")));
        }

        Ok(Some(CachedWindow {
            window_key: *key,
            policy,
            content_json,
            content_hash: stored_hash,
            computed_at: parse_time(&computed_at, "computed_at")?,
        }))
    }

    /// Store (or replace) the content of a window. Returns the content hash.
    pub async fn put_window_cache(
        &self,
        key: &WindowKey,
        policy: Policy,
        content_json: &str,
    ) -> Result<String> {
        self.check_writable()?;
        let hash = content_hash(content_json);
        let key_str = key.to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO window_cache (window_key, policy, content_json, content_hash, computed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(window_key) DO UPDATE SET
                   policy = excluded.policy,
                   content_json = excluded.content_json,
                   content_hash = excluded.content_hash,
                   computed_at = excluded.computed_at",
                params![
                    key_str.as_str(),
                    policy.as_str(),
                    content_json,
                    hash.as_str(),
                    now.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(hash)
    }

    /// Keys of every cached window, ascending.
    pub async fn list_window_cache_keys(&self) -> Result<Vec<WindowKey>> {
        let mut rows = self
            .conn
            .query(
                "SELECT window_key FROM window_cache ORDER BY window_key",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut keys = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let raw: String = row.get(0).map_err(db_err)?;
            keys.push(raw.parse().map_err(|_| corrupted(format!("window key '{raw}'")))?);
        }
        Ok(keys)
    }

    // -----------------------------------------------------------------------
    // Run registry
    // -----------------------------------------------------------------------

    /// Register a new run. A run id that is still `running` cannot be reused.
    pub async fn insert_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        let steps_json = serde_json::to_string(&run.steps)
            .map_err(|e| MediaLensError::Storage(e.to_string()))?;
        let started = run.started_at.to_rfc3339();
        let affected = self
            .conn
            .execute(
                "INSERT INTO runs (run_id, steps_json, completed_json, state, last_stage,
                                   last_position, error, stop_requested, started_at, finished_at)
                 VALUES (?1, ?2, '[]', ?3, NULL, NULL, NULL, 0, ?4, NULL)
                 ON CONFLICT(run_id) DO UPDATE SET
                   steps_json = excluded.steps_json,
                   completed_json = '[]',
                   state = excluded.state,
                   last_stage = NULL,
                   last_position = NULL,
                   error = NULL,
                   stop_requested = 0,
                   started_at = excluded.started_at,
                   finished_at = NULL
                 WHERE runs.state != 'running'",
                params![
                    run.run_id.as_str(),
                    steps_json.as_str(),
                    run.state.as_str(),
                    started.as_str()
                ],
            )
            .await
            .map_err(db_err)?;

        if affected == 0 {
            return Err(MediaLensError::validation(format!(
                "run '{}' is already running",
                run.run_id
            )));
        }
        Ok(())
    }

    /// Persist the mutable fields of a run record.
    pub async fn update_run(&self, run: &RunRecord) -> Result<()> {
        self.check_writable()?;
        let completed_json = serde_json::to_string(&run.completed_steps)
            .map_err(|e| MediaLensError::Storage(e.to_string()))?;
        let (last_stage, last_position) = match &run.last_cursor {
            Some((stage, pos)) => (Some(stage.as_str().to_string()), Some(pos.to_string())),
            None => (None, None),
        };
        let finished = run.finished_at.map(|t| t.to_rfc3339());
        self.conn
            .execute(
                "UPDATE runs
                 SET completed_json = ?1, state = ?2, last_stage = ?3, last_position = ?4,
                     error = ?5, finished_at = ?6
                 WHERE run_id = ?7",
                params![
                    completed_json.as_str(),
                    run.state.as_str(),
                    last_stage.as_deref(),
                    last_position.as_deref(),
                    run.error.as_deref(),
                    finished.as_deref(),
                    run.run_id.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Look up a run by id.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, steps_json, completed_json, state, last_stage, last_position,
                        error, stop_requested, started_at, finished_at
                 FROM runs WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id, steps_json, completed_json, state, last_stage, last_position,
                        error, stop_requested, started_at, finished_at
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            runs.push(row_to_run(&row)?);
        }
        Ok(runs)
    }

    /// Flag a running run for cooperative cancellation.
    ///
    /// Returns `false` when the run is unknown or no longer running.
    pub async fn request_stop(&self, run_id: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE runs SET stop_requested = 1 WHERE run_id = ?1 AND state = 'running'",
                params![run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Whether a stop has been requested for `run_id`.
    pub async fn stop_requested(&self, run_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT stop_requested FROM runs WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(db_err)? != 0),
            None => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Stage locks
    // -----------------------------------------------------------------------

    /// Take the writer lock of every stage in `stages` for `run_id`, all or nothing.
    ///
    /// Locks already held by the same run are kept. If any stage is held by
    /// another run, locks taken by this call are released and
    /// [`MediaLensError::StageLocked`] names the holder.
    pub async fn acquire_stage_locks(&self, run_id: &str, stages: &[Step]) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let mut taken: Vec<Step> = Vec::new();

        for &stage in stages {
            let affected = self
                .conn
                .execute(
                    "INSERT OR IGNORE INTO stage_locks (stage, run_id, acquired_at)
                     VALUES (?1, ?2, ?3)",
                    params![stage.as_str(), run_id, now.as_str()],
                )
                .await
                .map_err(db_err)?;
            if affected > 0 {
                taken.push(stage);
                continue;
            }

            let holder = self.stage_lock_holder(stage).await?;
            if holder.as_deref() == Some(run_id) {
                continue;
            }

            for &stage in &taken {
                self.release_stage_lock(stage, run_id).await?;
            }
            return Err(MediaLensError::StageLocked {
                stage: stage.as_str().into(),
                holder: holder.unwrap_or_default(),
            });
        }
        Ok(())
    }

    async fn stage_lock_holder(&self, stage: Step) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT run_id FROM stage_locks WHERE stage = ?1",
                params![stage.as_str()],
            )
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            None => Ok(None),
        }
    }

    async fn release_stage_lock(&self, stage: Step, run_id: &str) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM stage_locks WHERE stage = ?1 AND run_id = ?2",
                params![stage.as_str(), run_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Release every stage lock held by `run_id`.
    pub async fn release_stage_locks(&self, run_id: &str) -> Result<u64> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM stage_locks WHERE run_id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)
    }

    /// Operator override: drop the lock on `stage` whoever holds it.
    pub async fn force_release_stage_lock(&self, stage: Step) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "DELETE FROM stage_locks WHERE stage = ?1",
                params![stage.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Current locks as `(stage, run_id)`.
    pub async fn list_stage_locks(&self) -> Result<Vec<(Step, String)>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stage, run_id FROM stage_locks ORDER BY stage",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut locks = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let stage: String = row.get(0).map_err(db_err)?;
            let run_id: String = row.get(1).map_err(db_err)?;
            locks.push((stage.parse()?, run_id));
        }
        Ok(locks)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_cursor(row: &Row) -> Result<CursorRecord> {
    let stage: String = row.get(0).map_err(db_err)?;
    let position: String = row.get(1).map_err(db_err)?;
    let revision: i64 = row.get(2).map_err(db_err)?;
    let schema_version: u32 = row.get(3).map_err(db_err)?;
    let updated_at: String = row.get(4).map_err(db_err)?;

    if schema_version > CURRENT_SCHEMA_VERSION {
        return Err(corrupted(format!(
            "cursor '{stage}' has unknown schema version {schema_version}"
        )));
    }

    Ok(CursorRecord {
        schema_version,
        stage: stage
            .parse()
            .map_err(|_| corrupted(format!("cursor stage '{stage}'")))?,
        position: position
            .parse()
            .map_err(|_| corrupted(format!("cursor '{stage}' position '{position}'")))?,
        revision: u64::try_from(revision)
            .map_err(|_| corrupted(format!("cursor '{stage}' revision {revision}")))?,
        updated_at: parse_time(&updated_at, "updated_at")?,
    })
}

fn row_to_run(row: &Row) -> Result<RunRecord> {
    let run_id: String = row.get(0).map_err(db_err)?;
    let steps_json: String = row.get(1).map_err(db_err)?;
    let completed_json: String = row.get(2).map_err(db_err)?;
    let state: String = row.get(3).map_err(db_err)?;
    let last_stage: Option<String> = row.get::<String>(4).ok();
    let last_position: Option<String> = row.get::<String>(5).ok();
    let error: Option<String> = row.get::<String>(6).ok();
    let stop_requested: i64 = row.get(7).map_err(db_err)?;
    let started_at: String = row.get(8).map_err(db_err)?;
    let finished_at: Option<String> = row.get::<String>(9).ok();

    let steps: Vec<Step> = serde_json::from_str(&steps_json)
        .map_err(|e| corrupted(format!("run {run_id} steps: {e}")))?;
    let completed_steps: Vec<Step> = serde_json::from_str(&completed_json)
        .map_err(|e| corrupted(format!("run {run_id} completed steps: {e}")))?;

    let last_cursor = match (last_stage, last_position) {
        (Some(stage), Some(pos)) => Some((stage.parse()?, pos.parse()?)),
        _ => None,
    };

    Ok(RunRecord {
        state: state.parse::<RunState>()?,
        steps,
        completed_steps,
        last_cursor,
        error,
        stop_requested: stop_requested != 0,
        started_at: parse_time(&started_at, "started_at")?,
        finished_at: finished_at
            .map(|t| parse_time(&t, "finished_at"))
            .transpose()?,
        run_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ml_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn key(s: &str) -> JobKey {
        s.parse().unwrap()
    }

    fn run(id: &str) -> RunRecord {
        RunRecord {
            run_id: id.into(),
            steps: vec![Step::Extract, Step::Format],
            state: RunState::Running,
            completed_steps: Vec::new(),
            last_cursor: None,
            error: None,
            stop_requested: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ml_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn cursor_cas_roundtrip() {
        let storage = test_storage().await;
        assert!(storage.get_cursor(Step::Format).await.unwrap().is_none());

        let first = storage
            .put_cursor(Step::Format, key("2025-06-01_080000"), None)
            .await
            .expect("create cursor");
        assert_eq!(first.revision, 1);

        let second = storage
            .put_cursor(Step::Format, key("2025-06-02_080000"), Some(1))
            .await
            .expect("advance cursor");
        assert_eq!(second.revision, 2);

        let stored = storage.get_cursor(Step::Format).await.unwrap().unwrap();
        assert_eq!(stored.position, key("2025-06-02_080000"));
        assert_eq!(stored.revision, 2);
        assert_eq!(stored.schema_version, CURRENT_SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn stale_cursor_write_is_rejected() {
        let storage = test_storage().await;
        storage
            .put_cursor(Step::Deploy, key("2025-06-01_080000"), None)
            .await
            .unwrap();

        // A second creator lost the race.
        let err = storage
            .put_cursor(Step::Deploy, key("2025-06-03_080000"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::ConcurrentWrite { .. }));

        // A writer holding an old revision also loses.
        storage
            .put_cursor(Step::Deploy, key("2025-06-02_080000"), Some(1))
            .await
            .unwrap();
        let err = storage
            .put_cursor(Step::Deploy, key("2025-06-04_080000"), Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::ConcurrentWrite { .. }));
    }

    #[tokio::test]
    async fn delete_cursor_reports_presence() {
        let storage = test_storage().await;
        assert!(!storage.delete_cursor(Step::Extract).await.unwrap());
        storage
            .put_cursor(Step::Extract, key("2025-06-01_080000"), None)
            .await
            .unwrap();
        assert_eq!(storage.list_cursors().await.unwrap().len(), 1);
        assert!(storage.delete_cursor(Step::Extract).await.unwrap());
        assert!(storage.get_cursor(Step::Extract).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn window_cache_detects_tampering() {
        let storage = test_storage().await;
        let wk: WindowKey = "2025-W23".parse().unwrap();
        assert!(storage.get_window_cache(&wk).await.unwrap().is_none());

        let hash = storage
            .put_window_cache(&wk, Policy::Iso, r#"{"entries":[]}"#)
            .await
            .unwrap();
        let cached = storage.get_window_cache(&wk).await.unwrap().unwrap();
        assert_eq!(cached.content_hash, hash);
        assert_eq!(cached.policy, Policy::Iso);
        assert_eq!(storage.list_window_cache_keys().await.unwrap(), vec![wk]);

        storage
            .conn
            .execute(
                "UPDATE window_cache SET content_json = '{}' WHERE window_key = ?1",
                params!["2025-W23"],
            )
            .await
            .unwrap();
        let err = storage.get_window_cache(&wk).await.unwrap_err();
        assert!(matches!(err, MediaLensError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn run_registry_lifecycle() {
        let storage = test_storage().await;
        let mut record = run("run-a");
        storage.insert_run(&record).await.expect("insert run");

        // Reusing a running id is refused.
        assert!(storage.insert_run(&run("run-a")).await.is_err());

        assert!(storage.request_stop("run-a").await.unwrap());
        assert!(storage.stop_requested("run-a").await.unwrap());
        assert!(!storage.stop_requested("missing").await.unwrap());

        record.state = RunState::Cancelled;
        record.completed_steps = vec![Step::Extract];
        record.last_cursor = Some((Step::Extract, key("2025-06-02_080000")));
        record.finished_at = Some(Utc::now());
        storage.update_run(&record).await.unwrap();

        let stored = storage.get_run("run-a").await.unwrap().unwrap();
        assert_eq!(stored.state, RunState::Cancelled);
        assert_eq!(stored.completed_steps, vec![Step::Extract]);
        assert_eq!(stored.last_cursor, record.last_cursor);
        assert!(stored.stop_requested);
        assert!(stored.finished_at.is_some());

        // Finished runs can be reused, which clears the stop flag.
        storage.insert_run(&run("run-a")).await.expect("reuse id");
        assert!(!storage.stop_requested("run-a").await.unwrap());
        assert!(!storage.request_stop("missing").await.unwrap());
        assert_eq!(storage.list_runs(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stage_locks_are_exclusive() {
        let storage = test_storage().await;
        storage
            .acquire_stage_locks("run-a", &[Step::Extract, Step::Format])
            .await
            .expect("first run locks");
        // Re-acquiring by the same run is fine.
        storage
            .acquire_stage_locks("run-a", &[Step::Format])
            .await
            .unwrap();

        let err = storage
            .acquire_stage_locks("run-b", &[Step::Deploy, Step::Format])
            .await
            .unwrap_err();
        match err {
            MediaLensError::StageLocked { stage, holder } => {
                assert_eq!(stage, "format");
                assert_eq!(holder, "run-a");
            }
            other => panic!("unexpected error: {other}"),
        }
        // The partial deploy lock was rolled back.
        let locks = storage.list_stage_locks().await.unwrap();
        assert!(locks.iter().all(|(_, holder)| holder == "run-a"));

        assert_eq!(storage.release_stage_locks("run-a").await.unwrap(), 2);
        storage
            .acquire_stage_locks("run-b", &[Step::Deploy, Step::Format])
            .await
            .expect("locks free after release");
        assert!(storage.force_release_stage_lock(Step::Format).await.unwrap());
    }

    #[tokio::test]
    async fn readonly_refuses_writes() {
        let tmp = std::env::temp_dir().join(format!("ml_test_{}.db", Uuid::now_v7()));
        drop(Storage::open(&tmp).await.unwrap());
        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let err = ro
            .put_cursor(Step::Format, key("2025-06-01_080000"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaLensError::Storage(_)));
        assert!(ro.get_cursor(Step::Format).await.unwrap().is_none());
    }
}

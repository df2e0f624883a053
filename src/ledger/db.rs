use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::models::*;
use crate::critique::CritiqueTrace;
use crate::util::{char_len, content_hash};

/// Upper bound on sessions inspected when looking for one to resume.
const RESUMABLE_SCAN_LIMIT: usize = 20;

/// Async-safe handle to the ledger database.
///
/// Wraps `LedgerDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`.
#[derive(Clone)]
pub struct LedgerHandle {
    inner: Arc<std::sync::Mutex<LedgerDb>>,
}

impl LedgerHandle {
    pub fn new(db: LedgerDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&LedgerDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("Ledger lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("Ledger task panicked")?
    }

    /// Acquire the database mutex synchronously. For CLI reads and tests.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, LedgerDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("Ledger lock poisoned: {}", e))
    }
}

pub struct LedgerDb {
    conn: Connection,
}

impl LedgerDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path).context("Failed to open ledger database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory ledger database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS generation_runs (
                    run_id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    stage_id TEXT NOT NULL,
                    artifact_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    dependency_snapshot TEXT,
                    context_digest TEXT,
                    model_request TEXT,
                    error TEXT,
                    result TEXT,
                    critique_trace TEXT,
                    queued_at TEXT NOT NULL,
                    started_at TEXT,
                    completed_at TEXT,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunk_sessions (
                    run_id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL,
                    stage_id TEXT NOT NULL,
                    artifact_type TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'queued',
                    total_rounds INTEGER NOT NULL DEFAULT 0,
                    completed_rounds INTEGER NOT NULL DEFAULT 0,
                    error TEXT,
                    assembled TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS chunk_records (
                    run_id TEXT NOT NULL REFERENCES chunk_sessions(run_id) ON DELETE CASCADE,
                    round INTEGER NOT NULL,
                    content TEXT NOT NULL,
                    content_chars INTEGER NOT NULL,
                    content_hash TEXT NOT NULL,
                    finish_reason TEXT,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (run_id, round)
                );

                CREATE INDEX IF NOT EXISTS idx_runs_scope
                    ON generation_runs(project_id, stage_id, status);
                CREATE INDEX IF NOT EXISTS idx_sessions_scope
                    ON chunk_sessions(project_id, stage_id, artifact_type, updated_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Runs ──────────────────────────────────────────────────────────

    /// Queue a run. Re-queuing an existing run id (a resumed attempt)
    /// resets its status, error and result.
    pub fn create_run(&self, run: &NewRun) -> Result<GenerationRun> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO generation_runs
                    (run_id, project_id, stage_id, artifact_type, status, dependency_snapshot, queued_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, ?6, ?6)
                 ON CONFLICT(run_id) DO UPDATE SET
                    status = 'queued',
                    dependency_snapshot = excluded.dependency_snapshot,
                    error = NULL,
                    result = NULL,
                    critique_trace = NULL,
                    started_at = NULL,
                    completed_at = NULL,
                    queued_at = excluded.queued_at,
                    updated_at = excluded.updated_at",
                params![
                    run.run_id,
                    run.project_id,
                    run.stage_id,
                    run.artifact_type,
                    to_json(&run.dependency_snapshot)?,
                    now
                ],
            )
            .context("Failed to insert generation run")?;
        self.require_run(&run.run_id)
    }

    pub fn mark_run_running(
        &self,
        run_id: &str,
        digest: &ContextDigest,
        model_request: &ModelRequestMeta,
    ) -> Result<GenerationRun> {
        self.check_transition(run_id, RunStatus::Running)?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE generation_runs
                 SET status = 'running', context_digest = ?2, model_request = ?3,
                     started_at = ?4, updated_at = ?4
                 WHERE run_id = ?1",
                params![run_id, to_json(digest)?, to_json(model_request)?, now],
            )
            .context("Failed to mark run running")?;
        self.require_run(run_id)
    }

    pub fn mark_run_blocked(&self, run_id: &str, error: &RunError) -> Result<GenerationRun> {
        self.finish_run_with_error(run_id, RunStatus::Blocked, error)
    }

    pub fn mark_run_failed(&self, run_id: &str, error: &RunError) -> Result<GenerationRun> {
        self.finish_run_with_error(run_id, RunStatus::Failed, error)
    }

    pub fn mark_run_succeeded(
        &self,
        run_id: &str,
        result: &RunResult,
        critique_trace: &CritiqueTrace,
    ) -> Result<GenerationRun> {
        self.check_transition(run_id, RunStatus::Succeeded)?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE generation_runs
                 SET status = 'succeeded', result = ?2, critique_trace = ?3, error = NULL,
                     completed_at = ?4, updated_at = ?4
                 WHERE run_id = ?1",
                params![run_id, to_json(result)?, to_json(critique_trace)?, now],
            )
            .context("Failed to mark run succeeded")?;
        self.require_run(run_id)
    }

    fn finish_run_with_error(
        &self,
        run_id: &str,
        status: RunStatus,
        error: &RunError,
    ) -> Result<GenerationRun> {
        self.check_transition(run_id, status)?;
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "UPDATE generation_runs
                 SET status = ?2, error = ?3, completed_at = ?4, updated_at = ?4
                 WHERE run_id = ?1",
                params![run_id, status.as_str(), to_json(error)?, now],
            )
            .with_context(|| format!("Failed to mark run {}", status))?;
        self.require_run(run_id)
    }

    fn check_transition(&self, run_id: &str, next: RunStatus) -> Result<()> {
        let current = self.require_run(run_id)?.status;
        if !current.can_transition_to(next) {
            bail!("Invalid run transition for {}: {} -> {}", run_id, current, next);
        }
        Ok(())
    }

    fn require_run(&self, run_id: &str) -> Result<GenerationRun> {
        self.get_run(run_id)?
            .with_context(|| format!("Generation run not found: {}", run_id))
    }

    pub fn get_run(&self, run_id: &str) -> Result<Option<GenerationRun>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM generation_runs WHERE run_id = ?1", RUN_COLUMNS),
                params![run_id],
                RunRow::from_row,
            )
            .optional()
            .context("Failed to query generation run")?;
        row.map(RunRow::into_run).transpose()
    }

    /// Runs matching `filter`, newest first.
    pub fn list_runs(&self, filter: &RunFilter) -> Result<Vec<GenerationRun>> {
        let mut clauses = Vec::new();
        let mut values: Vec<String> = Vec::new();
        for (column, value) in [
            ("project_id", filter.project_id.clone()),
            ("stage_id", filter.stage_id.clone()),
            ("artifact_type", filter.artifact_type.clone()),
            ("status", filter.status.map(|s| s.as_str().to_string())),
        ] {
            if let Some(value) = value {
                values.push(value);
                clauses.push(format!("{} = ?{}", column, values.len()));
            }
        }
        let mut sql = format!("SELECT {} FROM generation_runs", RUN_COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY queued_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare list_runs")?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), RunRow::from_row)
            .context("Failed to query generation runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read generation_run row")?.into_run()?);
        }
        Ok(runs)
    }

    /// Fail `running` runs for (project, stage) that started before
    /// `cutoff`, along with their running sessions. Returns the run ids.
    pub fn recover_stale_runs(
        &self,
        project_id: &str,
        stage_id: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let stale: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare(
                    "SELECT run_id FROM generation_runs
                     WHERE project_id = ?1 AND stage_id = ?2 AND status = 'running'
                       AND started_at IS NOT NULL AND started_at < ?3",
                )
                .context("Failed to prepare stale run query")?;
            let rows = stmt
                .query_map(params![project_id, stage_id, timestamp(cutoff)], |row| {
                    row.get::<_, String>(0)
                })
                .context("Failed to query stale runs")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("Failed to read stale run ids")?
        };

        for run_id in &stale {
            let error = RunError::new(
                RunErrorCode::StaleRunRecovered,
                format!("Run {} was still running after the staleness threshold", run_id),
            );
            self.mark_run_failed(run_id, &error)?;
            self.conn
                .execute(
                    "UPDATE chunk_sessions SET status = 'failed', error = ?2, updated_at = ?3
                     WHERE run_id = ?1 AND status = 'running'",
                    params![run_id, to_json(&error)?, timestamp(Utc::now())],
                )
                .context("Failed to fail stale chunk session")?;
        }
        Ok(stale)
    }

    // ── Chunk sessions ────────────────────────────────────────────────

    /// Create the session for `run_id` or re-queue an existing one, keeping
    /// its chunks.
    pub fn ensure_session(
        &self,
        run_id: &str,
        project_id: &str,
        stage_id: &str,
        artifact_type: &str,
        total_rounds: u32,
    ) -> Result<ChunkSession> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO chunk_sessions
                    (run_id, project_id, stage_id, artifact_type, status, total_rounds,
                     completed_rounds, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'queued', ?5, 0, ?6, ?6)
                 ON CONFLICT(run_id) DO UPDATE SET
                    status = 'queued',
                    total_rounds = excluded.total_rounds,
                    error = NULL,
                    updated_at = excluded.updated_at",
                params![run_id, project_id, stage_id, artifact_type, total_rounds, now],
            )
            .context("Failed to upsert chunk session")?;
        self.require_session(run_id)
    }

    /// Store one round. A later write for the same round overwrites it.
    pub fn append_chunk(
        &self,
        run_id: &str,
        round: u32,
        content: &str,
        finish_reason: Option<&str>,
    ) -> Result<()> {
        let now = timestamp(Utc::now());
        self.conn
            .execute(
                "INSERT INTO chunk_records
                    (run_id, round, content, content_chars, content_hash, finish_reason, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(run_id, round) DO UPDATE SET
                    content = excluded.content,
                    content_chars = excluded.content_chars,
                    content_hash = excluded.content_hash,
                    finish_reason = excluded.finish_reason,
                    created_at = excluded.created_at",
                params![
                    run_id,
                    round,
                    content,
                    char_len(content) as i64,
                    content_hash(content),
                    finish_reason,
                    now
                ],
            )
            .context("Failed to store chunk record")?;
        self.conn
            .execute(
                "UPDATE chunk_sessions
                 SET completed_rounds = (SELECT COUNT(*) FROM chunk_records WHERE run_id = ?1),
                     status = 'running',
                     updated_at = ?2
                 WHERE run_id = ?1",
                params![run_id, now],
            )
            .context("Failed to update chunk session progress")?;
        Ok(())
    }

    pub fn mark_session_status(
        &self,
        run_id: &str,
        status: SessionStatus,
        error: Option<&RunError>,
    ) -> Result<()> {
        let error_json = error.map(to_json).transpose()?;
        let changed = self
            .conn
            .execute(
                "UPDATE chunk_sessions SET status = ?2, error = ?3, updated_at = ?4
                 WHERE run_id = ?1",
                params![run_id, status.as_str(), error_json, timestamp(Utc::now())],
            )
            .context("Failed to update chunk session status")?;
        if changed == 0 {
            bail!("Chunk session not found: {}", run_id);
        }
        Ok(())
    }

    pub fn mark_session_assembled(&self, run_id: &str, snapshot: &AssembledSnapshot) -> Result<()> {
        let changed = self
            .conn
            .execute(
                "UPDATE chunk_sessions SET status = 'assembled', assembled = ?2, updated_at = ?3
                 WHERE run_id = ?1",
                params![run_id, to_json(snapshot)?, timestamp(Utc::now())],
            )
            .context("Failed to mark chunk session assembled")?;
        if changed == 0 {
            bail!("Chunk session not found: {}", run_id);
        }
        Ok(())
    }

    fn require_session(&self, run_id: &str) -> Result<ChunkSession> {
        self.get_session(run_id)?
            .with_context(|| format!("Chunk session not found: {}", run_id))
    }

    pub fn get_session(&self, run_id: &str) -> Result<Option<ChunkSession>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM chunk_sessions WHERE run_id = ?1", SESSION_COLUMNS),
                params![run_id],
                SessionRow::from_row,
            )
            .optional()
            .context("Failed to query chunk session")?;
        match row {
            Some(row) => {
                let chunks = self.chunks_for(run_id)?;
                Ok(Some(row.into_session(chunks)?))
            }
            None => Ok(None),
        }
    }

    /// Sessions for (project, stage, type), most recently updated first.
    pub fn list_sessions(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_type: &str,
    ) -> Result<Vec<ChunkSession>> {
        self.query_sessions(
            &format!(
                "SELECT {} FROM chunk_sessions
                 WHERE project_id = ?1 AND stage_id = ?2 AND artifact_type = ?3
                 ORDER BY updated_at DESC, rowid DESC",
                SESSION_COLUMNS
            ),
            params![project_id, stage_id, artifact_type],
        )
    }

    /// Newest session for (project, stage, type) that an interrupted
    /// attempt can continue from.
    pub fn find_resumable_session(
        &self,
        project_id: &str,
        stage_id: &str,
        artifact_type: &str,
    ) -> Result<Option<ChunkSession>> {
        let candidates = self.query_sessions(
            &format!(
                "SELECT {} FROM chunk_sessions
                 WHERE project_id = ?1 AND stage_id = ?2 AND artifact_type = ?3
                   AND status IN ('running', 'failed', 'assembled')
                   AND completed_rounds > 0 AND completed_rounds < total_rounds
                 ORDER BY updated_at DESC, rowid DESC
                 LIMIT {}",
                SESSION_COLUMNS, RESUMABLE_SCAN_LIMIT
            ),
            params![project_id, stage_id, artifact_type],
        )?;
        Ok(candidates.into_iter().find(ChunkSession::is_resumable))
    }

    fn query_sessions(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ChunkSession>> {
        let rows: Vec<SessionRow> = {
            let mut stmt = self
                .conn
                .prepare(sql)
                .context("Failed to prepare session query")?;
            let rows = stmt
                .query_map(params, SessionRow::from_row)
                .context("Failed to query chunk sessions")?;
            rows.collect::<rusqlite::Result<_>>()
                .context("Failed to read chunk_session row")?
        };
        rows.into_iter()
            .map(|row| {
                let chunks = self.chunks_for(&row.run_id)?;
                row.into_session(chunks)
            })
            .collect()
    }

    fn chunks_for(&self, run_id: &str) -> Result<Vec<ChunkRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT round, content, content_chars, content_hash, finish_reason, created_at
                 FROM chunk_records WHERE run_id = ?1 ORDER BY round ASC",
            )
            .context("Failed to prepare chunk query")?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })
            .context("Failed to query chunk records")?;
        let mut chunks = Vec::new();
        for row in rows {
            let (round, content, content_chars, content_hash, finish_reason, created_at) =
                row.context("Failed to read chunk_record row")?;
            chunks.push(ChunkRecord {
                round,
                content,
                content_chars: content_chars as usize,
                content_hash,
                finish_reason,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(chunks)
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse timestamp {:?}", value))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize ledger column")
}

fn from_json<T: DeserializeOwned>(value: Option<String>, column: &str) -> Result<Option<T>> {
    value
        .map(|raw| {
            serde_json::from_str(&raw).with_context(|| format!("Failed to parse {} JSON", column))
        })
        .transpose()
}

const RUN_COLUMNS: &str = "run_id, project_id, stage_id, artifact_type, status, dependency_snapshot, \
     context_digest, model_request, error, result, critique_trace, queued_at, started_at, \
     completed_at, updated_at";

/// Intermediate row struct for generation_runs.
struct RunRow {
    run_id: String,
    project_id: String,
    stage_id: String,
    artifact_type: String,
    status: String,
    dependency_snapshot: Option<String>,
    context_digest: Option<String>,
    model_request: Option<String>,
    error: Option<String>,
    result: Option<String>,
    critique_trace: Option<String>,
    queued_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            project_id: row.get(1)?,
            stage_id: row.get(2)?,
            artifact_type: row.get(3)?,
            status: row.get(4)?,
            dependency_snapshot: row.get(5)?,
            context_digest: row.get(6)?,
            model_request: row.get(7)?,
            error: row.get(8)?,
            result: row.get(9)?,
            critique_trace: row.get(10)?,
            queued_at: row.get(11)?,
            started_at: row.get(12)?,
            completed_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_run(self) -> Result<GenerationRun> {
        let status = RunStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse run status")?;
        Ok(GenerationRun {
            run_id: self.run_id,
            project_id: self.project_id,
            stage_id: self.stage_id,
            artifact_type: self.artifact_type,
            status,
            dependency_snapshot: from_json(self.dependency_snapshot, "dependency_snapshot")?,
            context_digest: from_json(self.context_digest, "context_digest")?,
            model_request: from_json(self.model_request, "model_request")?,
            error: from_json(self.error, "error")?,
            result: from_json(self.result, "result")?,
            critique_trace: from_json(self.critique_trace, "critique_trace")?,
            queued_at: parse_timestamp(&self.queued_at)?,
            started_at: parse_optional_timestamp(self.started_at)?,
            completed_at: parse_optional_timestamp(self.completed_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

const SESSION_COLUMNS: &str = "run_id, project_id, stage_id, artifact_type, status, total_rounds, \
     completed_rounds, error, assembled, created_at, updated_at";

/// Intermediate row struct for chunk_sessions.
struct SessionRow {
    run_id: String,
    project_id: String,
    stage_id: String,
    artifact_type: String,
    status: String,
    total_rounds: u32,
    completed_rounds: u32,
    error: Option<String>,
    assembled: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SessionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            project_id: row.get(1)?,
            stage_id: row.get(2)?,
            artifact_type: row.get(3)?,
            status: row.get(4)?,
            total_rounds: row.get(5)?,
            completed_rounds: row.get(6)?,
            error: row.get(7)?,
            assembled: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_session(self, chunks: Vec<ChunkRecord>) -> Result<ChunkSession> {
        let status = SessionStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!(e))
            .context("Failed to parse session status")?;
        Ok(ChunkSession {
            run_id: self.run_id,
            project_id: self.project_id,
            stage_id: self.stage_id,
            artifact_type: self.artifact_type,
            status,
            total_rounds: self.total_rounds,
            completed_rounds: self.completed_rounds,
            chunks,
            error: from_json(self.error, "error")?,
            assembled: from_json(self.assembled, "assembled")?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

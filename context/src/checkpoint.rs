// Checkpoint store - durable run state keyed by thread id
//
// One row per thread. The full RunState is stored as JSON; a few columns are
// denormalized so suspended threads can be listed without decoding history.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use gatehouse_types::{RunState, ThreadId, ThreadSummary};

use crate::sqlite_util::{from_unix_millis, open_secure_db, to_unix_millis};

/// Persistence seam for the interrupt/resume boundary.
///
/// `save` replaces whatever was stored for the thread in one transaction.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, state: &RunState) -> Result<()>;

    fn load(&self, thread_id: &ThreadId) -> Result<Option<RunState>>;

    /// Removes the thread. Deleting an unknown thread is not an error.
    fn delete(&self, thread_id: &ThreadId) -> Result<()>;

    /// Threads currently waiting on a decision, most recent first.
    fn list_suspended(&self) -> Result<Vec<ThreadSummary>>;
}

/// SQLite-backed store. Survives process restarts.
pub struct SqliteCheckpointStore {
    db: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    const SCHEMA_VERSION: i64 = 1;

    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT PRIMARY KEY,
            state_json TEXT NOT NULL,
            suspended INTEGER NOT NULL,
            pending_tool TEXT,
            preview TEXT,
            updated_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_checkpoints_suspended
        ON checkpoints(updated_at_ms) WHERE suspended = 1;
    ";

    /// Open or create the checkpoint database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = open_secure_db(path)?;
        tracing::debug!(path = %path.display(), "Opened checkpoint store");
        Self::initialize(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory().context("Failed to open in-memory checkpoint db")?;
        Self::initialize(db)
    }

    fn initialize(db: Connection) -> Result<Self> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")
            .context("Failed to set checkpoint pragmas")?;

        let version: i64 = db
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .context("Failed to read checkpoint schema version")?;
        if version > Self::SCHEMA_VERSION {
            anyhow::bail!(
                "Checkpoint database schema v{version} is newer than supported v{}",
                Self::SCHEMA_VERSION
            );
        }

        db.execute_batch(Self::SCHEMA)
            .context("Failed to create checkpoint schema")?;
        db.pragma_update(None, "user_version", Self::SCHEMA_VERSION)
            .context("Failed to record checkpoint schema version")?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-statement leaves SQLite itself consistent; keep going.
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn save(&self, state: &RunState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to serialize run state")?;
        let summary = ThreadSummary::from(state);

        let mut db = self.conn();
        let tx = db
            .transaction()
            .context("Failed to start checkpoint transaction")?;
        tx.execute(
            "INSERT INTO checkpoints (thread_id, state_json, suspended, pending_tool, preview, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(thread_id) DO UPDATE SET
                state_json = excluded.state_json,
                suspended = excluded.suspended,
                pending_tool = excluded.pending_tool,
                preview = excluded.preview,
                updated_at_ms = excluded.updated_at_ms",
            params![
                state.thread_id.as_str(),
                json,
                state.is_suspended(),
                summary.pending_tool,
                summary.preview,
                to_unix_millis(state.updated_at),
            ],
        )
        .with_context(|| format!("Failed to write checkpoint for thread {}", state.thread_id))?;
        tx.commit()
            .context("Failed to commit checkpoint transaction")?;

        tracing::debug!(
            thread_id = %state.thread_id,
            suspended = state.is_suspended(),
            messages = state.messages.len(),
            "Checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, thread_id: &ThreadId) -> Result<Option<RunState>> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT state_json FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read checkpoint for thread {thread_id}"))?;

        raw.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt checkpoint for thread {thread_id}"))
        })
        .transpose()
    }

    fn delete(&self, thread_id: &ThreadId) -> Result<()> {
        self.conn()
            .execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.as_str()],
            )
            .with_context(|| format!("Failed to delete checkpoint for thread {thread_id}"))?;
        Ok(())
    }

    fn list_suspended(&self) -> Result<Vec<ThreadSummary>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(
                "SELECT thread_id, pending_tool, preview, updated_at_ms
                 FROM checkpoints WHERE suspended = 1
                 ORDER BY updated_at_ms DESC",
            )
            .context("Failed to prepare suspended-thread query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .context("Failed to query suspended threads")?;

        let mut out = Vec::new();
        for row in rows {
            let (id, pending_tool, preview, updated_at_ms) =
                row.context("Failed to read suspended thread row")?;
            let Ok(thread_id) = ThreadId::new(id) else {
                tracing::warn!("Skipping checkpoint with invalid thread id");
                continue;
            };
            out.push(ThreadSummary {
                thread_id,
                pending_tool,
                preview,
                updated_at: from_unix_millis(updated_at_ms),
            });
        }
        Ok(out)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<ThreadId, RunState>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn states(&self) -> MutexGuard<'_, HashMap<ThreadId, RunState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn save(&self, state: &RunState) -> Result<()> {
        self.states()
            .insert(state.thread_id.clone(), state.clone());
        Ok(())
    }

    fn load(&self, thread_id: &ThreadId) -> Result<Option<RunState>> {
        Ok(self.states().get(thread_id).cloned())
    }

    fn delete(&self, thread_id: &ThreadId) -> Result<()> {
        self.states().remove(thread_id);
        Ok(())
    }

    fn list_suspended(&self) -> Result<Vec<ThreadSummary>> {
        let mut out: Vec<ThreadSummary> = self
            .states()
            .values()
            .filter(|s| s.is_suspended())
            .map(ThreadSummary::from)
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }
}

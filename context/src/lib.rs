//! Durable run-state persistence.
//!
//! A thread's [`RunState`](gatehouse_types::RunState) is saved after every
//! transition that matters for recovery: suspension on an approval, merging
//! tool results, and completion. A later process can pick the thread back up
//! from the stored state alone.
//!
//! ```text
//! CheckpointStore (trait)
//! ├── SqliteCheckpointStore  (WAL, synchronous=FULL, owner-only file)
//! └── InMemoryCheckpointStore (tests, ephemeral sessions)
//! ```

mod checkpoint;
mod sqlite_util;

pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};

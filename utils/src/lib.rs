//! Shared infrastructure utilities for Gatehouse.
//!
//! - **`atomic_write`**: crash-safe file persistence (temp + rename), used by
//!   the report writer and the checkpoint directory setup
//! - **`security`**: secret redaction for anything shown on screen or logged

pub mod atomic_write;
pub mod security;

pub use atomic_write::{AtomicWriteOptions, FileSyncPolicy, PersistMode, atomic_write_with_options};
pub use security::{redact, redact_api_keys};

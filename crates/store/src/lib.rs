//! Persistent audit trail: activity log, terminal session transcripts, file
//! version snapshots, plus the flat settings table.
//!
//! Writers across connections only ever insert independent rows; the single
//! multi-row operation is the cascading [`AuditStore::delete_log`].

pub mod models;
pub mod sqlite;
pub mod versions;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

pub use {
    models::{
        ActivityLogEntry, FileVersion, FileVersionSummary, LogFilter, NewActivityLog,
        NewTerminalSession, SystemSetting, TerminalSession, actions,
    },
    sqlite::SqliteStore,
    versions::{WriteRecord, record_file_write},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("terminal session {0} does not exist")]
    SessionNotFound(i64),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed stored record: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Milliseconds since the Unix epoch; the timestamp unit of every record.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Audit sink and reader used by the gateway handlers.
#[async_trait]
pub trait AuditStore: Send + Sync {
    // ---- activity log ----
    /// Fails with [`StoreError::SessionNotFound`] when the entry links a
    /// session that doesn't exist.
    async fn create_log(&self, entry: &NewActivityLog) -> Result<i64>;
    async fn get_log(&self, id: i64) -> Result<Option<ActivityLogEntry>>;
    async fn list_logs(&self, filter: &LogFilter) -> Result<Vec<ActivityLogEntry>>;
    /// Deletes the entry and its linked terminal session. Returns false when
    /// no such entry exists.
    async fn delete_log(&self, id: i64) -> Result<bool>;

    // ---- terminal sessions ----
    async fn create_terminal_session(&self, session: &NewTerminalSession) -> Result<i64>;
    async fn get_terminal_session(&self, id: i64) -> Result<Option<TerminalSession>>;

    // ---- file versions ----
    /// `size` is always recorded as `content.len()`.
    async fn create_file_version(&self, log_id: i64, path: &str, content: &[u8]) -> Result<i64>;
    /// Newest first, without content.
    async fn list_file_versions(&self, path: &str) -> Result<Vec<FileVersionSummary>>;
    async fn get_file_version(&self, id: i64) -> Result<Option<FileVersion>>;
}

/// Flat key/value settings (model names, API keys for external helpers).
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> Result<Option<String>>;
    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;
    async fn list_settings(&self) -> Result<Vec<SystemSetting>>;
}

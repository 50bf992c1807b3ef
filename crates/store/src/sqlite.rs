use std::path::Path;

use {
    async_trait::async_trait,
    sqlx::{
        SqlitePool,
        sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    },
    tracing::debug,
};

use crate::{
    AuditStore, Result, SettingsStore, StoreError,
    models::{
        ActivityLogEntry, FileVersion, FileVersionSummary, LogFilter, NewActivityLog,
        NewTerminalSession, SystemSetting, TerminalSession,
    },
    now_ms,
};

/// SQLite-backed audit and settings store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    user_id: i64,
    action: String,
    target: String,
    details: String,
    terminal_session_id: Option<i64>,
    created_at: i64,
}

impl From<LogRow> for ActivityLogEntry {
    fn from(r: LogRow) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            action: r.action,
            target: r.target,
            details: r.details,
            terminal_session_id: r.terminal_session_id,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: i64,
    user_id: i64,
    commands: String,
    output: Vec<u8>,
    created_at: i64,
    ended_at: i64,
}

impl TryFrom<SessionRow> for TerminalSession {
    type Error = StoreError;

    fn try_from(r: SessionRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            commands: serde_json::from_str(&r.commands)?,
            output: r.output,
            created_at: r.created_at,
            ended_at: r.ended_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct VersionRow {
    id: i64,
    log_id: i64,
    path: String,
    content: Vec<u8>,
    size: i64,
    created_at: i64,
}

impl From<VersionRow> for FileVersion {
    fn from(r: VersionRow) -> Self {
        Self {
            id: r.id,
            log_id: r.log_id,
            path: r.path,
            content: r.content,
            size: r.size,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct VersionSummaryRow {
    id: i64,
    log_id: i64,
    path: String,
    size: i64,
    created_at: i64,
}

impl From<VersionSummaryRow> for FileVersionSummary {
    fn from(r: VersionSummaryRow) -> Self {
        Self {
            id: r.id,
            log_id: r.log_id,
            path: r.path,
            size: r.size,
            created_at: r.created_at,
        }
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database file and ensure the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::init(&pool).await?;
        debug!(path = %path.display(), "store opened");
        Ok(Self::new(pool))
    }

    /// Private in-memory database, used for tests and throwaway gateways.
    pub async fn in_memory() -> Result<Self> {
        // One connection: each `sqlite::memory:` connection is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::init(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Create the tables if they don't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS terminal_sessions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id    INTEGER NOT NULL,
                commands   TEXT    NOT NULL,
                output     BLOB    NOT NULL,
                created_at INTEGER NOT NULL,
                ended_at   INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS activity_logs (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id             INTEGER NOT NULL,
                action              TEXT    NOT NULL,
                target              TEXT    NOT NULL,
                details             TEXT    NOT NULL,
                terminal_session_id INTEGER REFERENCES terminal_sessions(id),
                created_at          INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS file_versions (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                log_id     INTEGER NOT NULL,
                path       TEXT    NOT NULL,
                content    BLOB    NOT NULL,
                size       INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS system_settings (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_activity_logs_user ON activity_logs(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_activity_logs_action ON activity_logs(action)",
            "CREATE INDEX IF NOT EXISTS idx_file_versions_path ON file_versions(path)",
            "CREATE INDEX IF NOT EXISTS idx_file_versions_log ON file_versions(log_id)",
        ] {
            sqlx::query(ddl).execute(pool).await?;
        }

        Ok(())
    }

    /// Close the pool; pending queries finish first.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AuditStore for SqliteStore {
    async fn create_log(&self, entry: &NewActivityLog) -> Result<i64> {
        if let Some(session_id) = entry.terminal_session_id {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM terminal_sessions WHERE id = ?")
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if exists.is_none() {
                return Err(StoreError::SessionNotFound(session_id));
            }
        }

        let id = sqlx::query(
            r#"INSERT INTO activity_logs
                 (user_id, action, target, details, terminal_session_id, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.target)
        .bind(&entry.details)
        .bind(entry.terminal_session_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn get_log(&self, id: i64) -> Result<Option<ActivityLogEntry>> {
        let row = sqlx::query_as::<_, LogRow>("SELECT * FROM activity_logs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list_logs(&self, filter: &LogFilter) -> Result<Vec<ActivityLogEntry>> {
        let rows = match filter.user_id {
            Some(user_id) => {
                sqlx::query_as::<_, LogRow>(
                    "SELECT * FROM activity_logs WHERE user_id = ? \
                     ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(user_id)
                .bind(i64::from(filter.limit))
                .fetch_all(&self.pool)
                .await?
            },
            None => {
                sqlx::query_as::<_, LogRow>(
                    "SELECT * FROM activity_logs ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(i64::from(filter.limit))
                .fetch_all(&self.pool)
                .await?
            },
        };
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn delete_log(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let link: Option<Option<i64>> =
            sqlx::query_scalar("SELECT terminal_session_id FROM activity_logs WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(link) = link else {
            return Ok(false);
        };

        // The log row references the session, so it has to go first.
        sqlx::query("DELETE FROM activity_logs WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if let Some(session_id) = link {
            sqlx::query("DELETE FROM terminal_sessions WHERE id = ?")
                .bind(session_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn create_terminal_session(&self, session: &NewTerminalSession) -> Result<i64> {
        let commands = serde_json::to_string(&session.commands)?;
        let id = sqlx::query(
            r#"INSERT INTO terminal_sessions (user_id, commands, output, created_at, ended_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(session.user_id)
        .bind(commands)
        .bind(&session.output)
        .bind(session.created_at)
        .bind(session.ended_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn get_terminal_session(&self, id: i64) -> Result<Option<TerminalSession>> {
        sqlx::query_as::<_, SessionRow>("SELECT * FROM terminal_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn create_file_version(&self, log_id: i64, path: &str, content: &[u8]) -> Result<i64> {
        let id = sqlx::query(
            r#"INSERT INTO file_versions (log_id, path, content, size, created_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(log_id)
        .bind(path)
        .bind(content)
        .bind(content.len() as i64)
        .bind(now_ms())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    async fn list_file_versions(&self, path: &str) -> Result<Vec<FileVersionSummary>> {
        let rows = sqlx::query_as::<_, VersionSummaryRow>(
            "SELECT id, log_id, path, size, created_at FROM file_versions \
             WHERE path = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn get_file_version(&self, id: i64) -> Result<Option<FileVersion>> {
        let row = sqlx::query_as::<_, VersionRow>("SELECT * FROM file_versions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }
}

#[async_trait]
impl SettingsStore for SqliteStore {
    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT value FROM system_settings WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO system_settings (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(key)
        .bind(value.trim())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_settings(&self) -> Result<Vec<SystemSetting>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM system_settings ORDER BY key ASC")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows
            .into_iter()
            .map(|(key, value)| SystemSetting { key, value })
            .collect())
    }
}

use serde::{Serialize, Serializer};

/// Action kinds written by the gateway.
pub mod actions {
    pub const TERMINAL_SESSION: &str = "TERMINAL_SESSION";
    pub const FILE_WRITE: &str = "FILE_WRITE";
    pub const PROCESS_KILL: &str = "PROCESS_KILL";
    pub const SERVICE_MANAGE: &str = "SERVICE_MANAGE";
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// One audit record. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityLogEntry {
    pub id: i64,
    pub user_id: i64,
    pub action: String,
    pub target: String,
    pub details: String,
    pub terminal_session_id: Option<i64>,
    pub created_at: i64,
}

/// Insert payload for [`ActivityLogEntry`].
#[derive(Debug, Clone)]
pub struct NewActivityLog {
    pub user_id: i64,
    pub action: String,
    pub target: String,
    pub details: String,
    pub terminal_session_id: Option<i64>,
}

impl NewActivityLog {
    pub fn new(
        user_id: i64,
        action: impl Into<String>,
        target: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            action: action.into(),
            target: target.into(),
            details: details.into(),
            terminal_session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: i64) -> Self {
        self.terminal_session_id = Some(session_id);
        self
    }
}

/// Recorded terminal session: reconstructed commands plus raw output.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalSession {
    pub id: i64,
    pub user_id: i64,
    pub commands: Vec<String>,
    #[serde(serialize_with = "lossy_utf8")]
    pub output: Vec<u8>,
    pub created_at: i64,
    pub ended_at: i64,
}

/// Insert payload for [`TerminalSession`].
#[derive(Debug, Clone)]
pub struct NewTerminalSession {
    pub user_id: i64,
    pub commands: Vec<String>,
    pub output: Vec<u8>,
    pub created_at: i64,
    pub ended_at: i64,
}

impl NewTerminalSession {
    /// `ended_at` is clamped so a session never ends before it started.
    pub fn new(
        user_id: i64,
        commands: Vec<String>,
        output: Vec<u8>,
        created_at: i64,
        ended_at: i64,
    ) -> Self {
        Self {
            user_id,
            commands,
            output,
            created_at,
            ended_at: ended_at.max(created_at),
        }
    }
}

/// Immutable snapshot of a file's content at write time.
#[derive(Debug, Clone, Serialize)]
pub struct FileVersion {
    pub id: i64,
    pub log_id: i64,
    pub path: String,
    #[serde(serialize_with = "lossy_utf8")]
    pub content: Vec<u8>,
    pub size: i64,
    pub created_at: i64,
}

/// Version chain entry without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileVersionSummary {
    pub id: i64,
    pub log_id: i64,
    pub path: String,
    pub size: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
}

/// Selection for [`crate::AuditStore::list_logs`].
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Only entries by this actor; `None` lists everyone's.
    pub user_id: Option<i64>,
    pub limit: u32,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            user_id: None,
            limit: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_end_is_clamped_to_start() {
        let s = NewTerminalSession::new(1, vec!["ls".into()], Vec::new(), 2_000, 1_500);
        assert_eq!(s.ended_at, 2_000);
        let s = NewTerminalSession::new(1, Vec::new(), Vec::new(), 2_000, 2_500);
        assert_eq!(s.ended_at, 2_500);
    }

    #[test]
    fn binary_fields_serialize_as_text() {
        let v = FileVersion {
            id: 1,
            log_id: 2,
            path: "/tmp/a.txt".into(),
            content: b"hello".to_vec(),
            size: 5,
            created_at: 0,
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["content"], "hello");
        assert_eq!(json["size"], 5);
    }
}

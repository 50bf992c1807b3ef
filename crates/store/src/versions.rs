use tracing::debug;

use crate::{AuditStore, NewActivityLog, Result, actions};

/// Ids created by [`record_file_write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteRecord {
    pub log_id: i64,
    pub version_id: i64,
}

/// Audit a successful file write: a `FILE_WRITE` log entry, then a snapshot
/// of exactly `content` linked to it.
///
/// The two inserts are not transactional. If the second fails the log entry
/// stays behind without a version.
pub async fn record_file_write(
    store: &dyn AuditStore,
    user_id: i64,
    path: &str,
    content: &[u8],
) -> Result<WriteRecord> {
    let log_id = store
        .create_log(&NewActivityLog::new(
            user_id,
            actions::FILE_WRITE,
            path,
            format!("Wrote {} bytes", content.len()),
        ))
        .await?;
    let version_id = store.create_file_version(log_id, path, content).await?;
    debug!(path, log_id, version_id, size = content.len(), "file write recorded");
    Ok(WriteRecord { log_id, version_id })
}

use std::{
    fs::Metadata,
    io::ErrorKind,
    os::unix::fs::{FileTypeExt, PermissionsExt},
    path::Path,
    sync::Arc,
    time::SystemTime,
};

use {
    base64::{Engine, engine::general_purpose::STANDARD},
    chrono::{DateTime, Local},
    hostdeck_store::{AuditStore, StoreError, record_file_write},
    serde_json::Value,
    tokio::{fs, io::AsyncWriteExt, process::Command},
    tracing::{debug, info, warn},
};

use crate::{
    path::clean_path,
    protocol::{
        DirStats, DiskReport, EntryInfo, FileRequest, FileResponse, RequestData, ResponseData,
        decode_request,
    },
};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, thiserror::Error)]
pub enum FileOpError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid base64")]
    InvalidBase64,

    #[error("cp {from} {to}: {reason}")]
    Copy {
        from: String,
        to: String,
        reason: String,
    },

    #[error("file written but audit record failed: {0}")]
    Audit(#[from] StoreError),
}

fn io_err<'a>(op: &'static str, path: &'a str) -> impl FnOnce(std::io::Error) -> FileOpError + 'a {
    move |source| FileOpError::Io {
        op,
        path: path.to_string(),
        source,
    }
}

/// Executes file requests for one or more connections. Stateless apart from
/// the audit store; writes by a known actor are audited and versioned.
#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn AuditStore>,
}

impl FileService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Decode and execute one text frame.
    pub async fn handle_text(&self, actor: Option<i64>, text: &str) -> FileResponse {
        match decode_request(text) {
            Ok(req) => self.handle(actor, req).await,
            Err(err) => {
                debug!(action = %err.action, error = %err.message, "undecodable file request");
                err.into()
            },
        }
    }

    pub async fn handle(&self, actor: Option<i64>, req: FileRequest) -> FileResponse {
        let action = req.action();
        match req {
            FileRequest::List { path } => {
                let path = clean_path(&path);
                match list_dir(&path).await {
                    Ok(entries) => FileResponse::new(action)
                        .path(path)
                        .data(ResponseData::Entries(entries)),
                    Err(e) => FileResponse::new(action).error(e.to_string()).path(path),
                }
            },
            FileRequest::Cat { path } => {
                let path = clean_path(&path);
                match fs::read(&path).await.map_err(io_err("open", &path)) {
                    Ok(bytes) => FileResponse::new(action)
                        .path(path)
                        .content(String::from_utf8_lossy(&bytes)),
                    Err(e) => FileResponse::new(action).error(e.to_string()),
                }
            },
            FileRequest::Read { path, data } => {
                let path = clean_path(&path);
                let request_id = request_id(data.as_ref());
                match fs::read(&path).await.map_err(io_err("open", &path)) {
                    Ok(bytes) => FileResponse::ok(action)
                        .data(ResponseData::Base64(STANDARD.encode(bytes)))
                        .request_id(request_id),
                    Err(e) => FileResponse::new(action)
                        .error(e.to_string())
                        .request_id(request_id),
                }
            },
            FileRequest::Write {
                path,
                content,
                data,
            } => {
                let path = clean_path(&path);
                let request_id = request_id(data.as_ref());
                match self.write(actor, &path, content, data.as_ref()).await {
                    Ok(()) => FileResponse::ok(action).request_id(request_id),
                    Err(FileOpError::InvalidBase64) => FileResponse::new(action)
                        .error(FileOpError::InvalidBase64.to_string())
                        .request_id(request_id),
                    Err(e) => FileResponse::failed(action, e.to_string()).request_id(request_id),
                }
            },
            FileRequest::Rm { path } => done(action, remove(&clean_path(&path)).await),
            FileRequest::Mkdir { path } => {
                let path = clean_path(&path);
                let result = fs::DirBuilder::new()
                    .recursive(true)
                    .mode(0o755)
                    .create(&path)
                    .await
                    .map_err(io_err("mkdir", &path));
                done(action, result)
            },
            FileRequest::Rename { path, new_path } => {
                let (from, to) = (clean_path(&path), clean_path(&new_path));
                let result = fs::rename(&from, &to)
                    .await
                    .map_err(io_err("rename", &from));
                done(action, result)
            },
            FileRequest::Copy { path, new_path } => {
                let (from, to) = (clean_path(&path), clean_path(&new_path));
                done(action, copy_recursive(&from, &to).await)
            },
            FileRequest::Stats { path } => {
                let stats = dir_stats(&clean_path(&path)).await;
                FileResponse::ok(action).data(ResponseData::Stats(stats))
            },
            FileRequest::Diskusage { path } => {
                let path = clean_path(&path);
                FileResponse::ok(action).data(ResponseData::Disk(disk_report(path).await))
            },
        }
    }

    async fn write(
        &self,
        actor: Option<i64>,
        path: &str,
        content: String,
        data: Option<&RequestData>,
    ) -> Result<(), FileOpError> {
        let bytes = if data.is_some_and(RequestData::is_base64) {
            STANDARD
                .decode(content.as_bytes())
                .map_err(|_| FileOpError::InvalidBase64)?
        } else {
            content.into_bytes()
        };

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(path)
            .await
            .map_err(io_err("open", path))?;
        file.write_all(&bytes).await.map_err(io_err("write", path))?;
        file.flush().await.map_err(io_err("write", path))?;

        let Some(user_id) = actor else {
            debug!(path, size = bytes.len(), "anonymous write, not audited");
            return Ok(());
        };
        match record_file_write(self.store.as_ref(), user_id, path, &bytes).await {
            Ok(rec) => {
                info!(path, user_id, size = bytes.len(), log_id = rec.log_id, "file written");
                Ok(())
            },
            Err(e) => {
                warn!(path, user_id, error = %e, "file write audit failed");
                Err(e.into())
            },
        }
    }
}

fn request_id(data: Option<&RequestData>) -> Option<Value> {
    data.and_then(|d| d.request_id.clone())
}

fn done(action: &str, result: Result<(), FileOpError>) -> FileResponse {
    match result {
        Ok(()) => FileResponse::ok(action),
        Err(e) => FileResponse::failed(action, e.to_string()),
    }
}

async fn list_dir(path: &str) -> Result<Vec<EntryInfo>, FileOpError> {
    let mut dir = fs::read_dir(path).await.map_err(io_err("open", path))?;
    let mut entries = Vec::new();
    while let Some(entry) = dir.next_entry().await.map_err(io_err("readdir", path))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Entries removed between readdir and lstat are skipped.
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        let is_dir = meta.is_dir();
        entries.push(EntryInfo {
            name,
            kind: if is_dir { "folder" } else { "file" },
            is_dir,
            size: meta.len(),
            mode: mode_string(&meta),
            modified: format_mtime(meta.modified().ok()),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// `ls -l` style mode, e.g. `drwxr-xr-x` or `-rw-r--r--`.
pub fn mode_string(meta: &Metadata) -> String {
    let ft = meta.file_type();
    let mut out = String::with_capacity(12);
    if ft.is_dir() {
        out.push('d');
    }
    if ft.is_symlink() {
        out.push('L');
    }
    if ft.is_block_device() || ft.is_char_device() {
        out.push('D');
    }
    if ft.is_fifo() {
        out.push('p');
    }
    if ft.is_socket() {
        out.push('S');
    }
    let mode = meta.permissions().mode();
    if mode & 0o4000 != 0 {
        out.push('u');
    }
    if mode & 0o2000 != 0 {
        out.push('g');
    }
    if ft.is_char_device() {
        out.push('c');
    }
    if mode & 0o1000 != 0 {
        out.push('t');
    }
    if out.is_empty() {
        out.push('-');
    }
    out.push_str(&permission_bits(mode));
    out
}

fn permission_bits(mode: u32) -> String {
    const RWX: &[u8; 9] = b"rwxrwxrwx";
    RWX.iter()
        .enumerate()
        .map(|(i, &c)| {
            if mode & (1 << (8 - i)) != 0 {
                c as char
            } else {
                '-'
            }
        })
        .collect()
}

fn format_mtime(modified: Option<SystemTime>) -> String {
    modified
        .map(|t| DateTime::<Local>::from(t).to_rfc3339())
        .unwrap_or_default()
}

async fn remove(path: &str) -> Result<(), FileOpError> {
    let meta = match fs::symlink_metadata(path).await {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(io_err("lstat", path)(e)),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_err("remove", path)(e)),
    }
}

async fn copy_recursive(from: &str, to: &str) -> Result<(), FileOpError> {
    let output = Command::new("cp")
        .arg("-r")
        .arg(from)
        .arg(to)
        .output()
        .await
        .map_err(io_err("exec cp", from))?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(FileOpError::Copy {
        from: from.to_string(),
        to: to.to_string(),
        reason: if stderr.is_empty() {
            output.status.to_string()
        } else {
            stderr
        },
    })
}

/// Counts of the immediate children. Any error yields zeros.
async fn dir_stats(path: &str) -> DirStats {
    let mut stats = DirStats::default();
    let Ok(mut dir) = fs::read_dir(path).await else {
        return stats;
    };
    while let Ok(Some(entry)) = dir.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_dir() {
            stats.folder_count += 1;
        } else {
            stats.file_count += 1;
            stats.total_size += meta.len();
        }
    }
    stats
}

async fn disk_report(path: String) -> DiskReport {
    let usage = tokio::task::spawn_blocking(move || {
        hostdeck_monitor::disk_usage_with_fallback(Path::new(&path))
    })
    .await
    .unwrap_or_default();
    DiskReport {
        used_percent: usage.used_percent(),
        used_str: gib(usage.used),
        total_str: gib(usage.total),
        free_str: gib(usage.free),
    }
}

fn gib(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / GIB)
}

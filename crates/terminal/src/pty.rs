//! Shell on a pseudo-terminal, split into the pieces the bridge drives from
//! separate threads: an output reader, an input/resize control loop, and
//! the child handle used for teardown.

use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

use {
    portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system},
    serde::Deserialize,
    tokio::sync::mpsc,
    tracing::{debug, trace, warn},
};

/// Size of each PTY read.
pub const READ_CHUNK: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(String),
    #[error("failed to spawn {shell}: {reason}")]
    Spawn { shell: String, reason: String },
    #[error("pty handle unavailable: {0}")]
    Handle(String),
}

#[derive(Debug, Clone)]
pub struct PtyOptions {
    pub shell: String,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            shell: "/bin/bash".into(),
            args: Vec::new(),
            cols: 80,
            rows: 24,
        }
    }
}

/// Work for the control thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyCommand {
    Input(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

#[derive(Deserialize)]
struct ResizeFrame {
    #[serde(rename = "type")]
    kind: String,
    cols: u16,
    rows: u16,
}

/// `Some((cols, rows))` when `text` is a `{"type":"resize","cols":..,"rows":..}`
/// frame. Anything else is terminal input.
pub fn parse_resize(text: &str) -> Option<(u16, u16)> {
    let frame: ResizeFrame = serde_json::from_str(text).ok()?;
    (frame.kind == "resize").then_some((frame.cols, frame.rows))
}

/// A freshly spawned shell, before it is split across threads.
pub struct Pty {
    child: Box<dyn Child + Send + Sync>,
    master: Box<dyn MasterPty + Send>,
    reader: Box<dyn Read + Send>,
    writer: Box<dyn Write + Send>,
}

impl Pty {
    pub fn spawn(opts: &PtyOptions) -> Result<Self, PtyError> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: opts.rows,
                cols: opts.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&opts.shell);
        cmd.args(&opts.args);
        cmd.env("TERM", "xterm-256color");
        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn {
                shell: opts.shell.clone(),
                reason: e.to_string(),
            })?;
        // Only the child may hold the slave side, otherwise the reader never
        // sees EOF after the shell exits.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Handle(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Handle(e.to_string()))?;
        debug!(shell = %opts.shell, pid = ?child.process_id(), "pty spawned");

        Ok(Self {
            child,
            master: pair.master,
            reader,
            writer,
        })
    }

    pub fn split(self) -> (PtyReader, PtyControl, PtyChild) {
        (
            PtyReader {
                reader: self.reader,
            },
            PtyControl {
                master: self.master,
                writer: self.writer,
            },
            PtyChild { child: self.child },
        )
    }
}

/// Output side of the PTY.
pub struct PtyReader {
    reader: Box<dyn Read + Send>,
}

impl PtyReader {
    /// Blocking. Forwards output chunks in order until EOF, a read error,
    /// or the receiver is dropped.
    pub fn pump(mut self, tx: mpsc::Sender<Vec<u8>>) {
        let mut buf = [0_u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut buf) {
                Ok(0) => {
                    trace!("pty output eof");
                    break;
                },
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => {},
                Err(e) => {
                    // EIO is how Linux reports a closed slave.
                    trace!(error = %e, "pty read ended");
                    break;
                },
            }
        }
    }
}

/// Input and resize side of the PTY. Dropping it closes the master.
pub struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
}

impl PtyControl {
    pub fn write_input(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.writer.write_all(bytes)?;
        self.writer.flush()
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Handle(e.to_string()))
    }

    /// Blocking. Applies commands until the sender side is dropped or a
    /// write fails.
    pub fn run(mut self, mut rx: mpsc::Receiver<PtyCommand>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                PtyCommand::Input(bytes) => {
                    if let Err(e) = self.write_input(&bytes) {
                        debug!(error = %e, "pty write failed");
                        break;
                    }
                },
                PtyCommand::Resize { cols, rows } => {
                    if let Err(e) = self.resize(cols, rows) {
                        warn!(cols, rows, error = %e, "pty resize failed");
                    }
                },
            }
        }
    }
}

/// The shell process.
pub struct PtyChild {
    child: Box<dyn Child + Send + Sync>,
}

impl PtyChild {
    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Blocking. Kills the shell if it's still running and reaps it,
    /// giving up on the reap after `grace`.
    pub fn terminate(mut self, grace: Duration) {
        match self.child.try_wait() {
            Ok(Some(status)) => {
                debug!(?status, "shell already exited");
                return;
            },
            Ok(None) => {},
            Err(e) => debug!(error = %e, "shell status unavailable"),
        }
        if let Err(e) = self.child.kill() {
            debug!(error = %e, "failed to kill shell");
        }
        let deadline = std::time::Instant::now() + grace;
        while std::time::Instant::now() < deadline {
            if let Ok(Some(_)) = self.child.try_wait() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        warn!(pid = ?self.child.process_id(), "shell not reaped after kill");
    }
}

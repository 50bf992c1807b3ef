//! Terminal bridge building blocks: the shell on a PTY and the recorder that
//! turns a connection's keystrokes and output into an audit record.

pub mod pty;
pub mod recorder;

pub use {
    pty::{
        PtyChild, PtyCommand, PtyControl, PtyError, PtyOptions, PtyReader, Pty, READ_CHUNK,
        parse_resize,
    },
    recorder::{
        CommandRecorder, PersistedSession, format_elapsed, persist_session, session_details,
    },
};

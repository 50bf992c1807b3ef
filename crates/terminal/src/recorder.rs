use std::time::Duration;

use {
    hostdeck_store::{AuditStore, NewActivityLog, NewTerminalSession, actions},
    tracing::debug,
};

const CR: u8 = 13;
const BS: u8 = 8;
const DEL: u8 = 127;

/// Reconstructs submitted command lines from raw keystrokes and keeps the
/// full output transcript of one terminal connection.
///
/// Only backspace editing is understood; cursor movement, history recall
/// and multi-byte input are not. Input still pending when the session
/// ends is not a command.
#[derive(Debug, Default)]
pub struct CommandRecorder {
    pending: Vec<u8>,
    commands: Vec<String>,
    transcript: Vec<u8>,
}

impl CommandRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes the client sent to the PTY.
    pub fn feed_input(&mut self, bytes: &[u8]) {
        for &b in bytes {
            match b {
                CR => {
                    if !self.pending.is_empty() {
                        let line = std::mem::take(&mut self.pending);
                        self.commands
                            .push(String::from_utf8_lossy(&line).into_owned());
                    }
                },
                BS | DEL => {
                    self.pending.pop();
                },
                32..=126 => self.pending.push(b),
                _ => {},
            }
        }
    }

    /// Append PTY output to the transcript verbatim.
    pub fn record_output(&mut self, bytes: &[u8]) {
        self.transcript.extend_from_slice(bytes);
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn transcript(&self) -> &[u8] {
        &self.transcript
    }

    /// Session record to persist, if any. Anonymous sessions and sessions
    /// without a single submitted command are dropped.
    pub fn finish(
        self,
        actor: Option<i64>,
        started_at: i64,
        ended_at: i64,
    ) -> Option<NewTerminalSession> {
        let user_id = actor?;
        if self.commands.is_empty() {
            return None;
        }
        Some(NewTerminalSession::new(
            user_id,
            self.commands,
            self.transcript,
            started_at,
            ended_at,
        ))
    }
}

/// Ids created by [`persist_session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistedSession {
    pub session_id: i64,
    pub log_id: i64,
}

/// `Terminal Session (1m5s) - 3 cmds`
pub fn session_details(elapsed: Duration, commands: usize) -> String {
    format!(
        "Terminal Session ({}) - {commands} cmds",
        format_elapsed(elapsed)
    )
}

/// Whole seconds, rounded half up, rendered like `72h3m0s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let mut secs = elapsed.as_secs();
    if elapsed.subsec_millis() >= 500 {
        secs += 1;
    }
    let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Store the session, then the `TERMINAL_SESSION` log entry linked to it.
pub async fn persist_session(
    store: &dyn AuditStore,
    session: &NewTerminalSession,
    elapsed: Duration,
) -> hostdeck_store::Result<PersistedSession> {
    let session_id = store.create_terminal_session(session).await?;
    let entry = NewActivityLog::new(
        session.user_id,
        actions::TERMINAL_SESSION,
        "System",
        session_details(elapsed, session.commands.len()),
    )
    .with_session(session_id);
    let log_id = store.create_log(&entry).await?;
    debug!(
        session_id,
        log_id,
        commands = session.commands.len(),
        bytes = session.output.len(),
        "terminal session persisted"
    );
    Ok(PersistedSession { session_id, log_id })
}

#[cfg(test)]
mod tests {
    use {super::*, hostdeck_store::SqliteStore};

    fn recorded(input: &[u8]) -> Vec<String> {
        let mut rec = CommandRecorder::new();
        rec.feed_input(input);
        rec.commands().to_vec()
    }

    #[test]
    fn cr_submits_pending_line() {
        assert_eq!(recorded(b"ls -la\r"), vec!["ls -la"]);
        assert_eq!(recorded(b"ls\rpwd\r"), vec!["ls", "pwd"]);
    }

    #[test]
    fn empty_lines_are_not_commands() {
        assert!(recorded(b"\r\r\r").is_empty());
    }

    #[test]
    fn backspace_and_delete_edit_pending() {
        assert_eq!(recorded(b"lss\x7f -l\r"), vec!["ls -l"]);
        assert_eq!(recorded(b"cd\x08\x08pwd\r"), vec!["pwd"]);
        // Backspace on an empty line is a no-op.
        assert_eq!(recorded(b"\x08\x7fid\r"), vec!["id"]);
    }

    #[test]
    fn control_and_high_bytes_are_ignored() {
        assert_eq!(recorded(b"\x1b[Aecho\thi\n\r"), vec!["[Aechohi"]);
        assert_eq!(recorded(&[b'a', 0xc3, 0xa9, b'b', CR]), vec!["ab"]);
    }

    #[test]
    fn input_split_across_frames() {
        let mut rec = CommandRecorder::new();
        rec.feed_input(b"ec");
        rec.feed_input(b"ho hi");
        rec.feed_input(b"\r");
        assert_eq!(rec.commands(), ["echo hi"]);
    }

    #[test]
    fn unterminated_tail_is_not_a_command() {
        let mut rec = CommandRecorder::new();
        rec.feed_input(b"whoami\rexit");
        assert_eq!(rec.commands(), ["whoami"]);
        assert_eq!(rec.pending(), b"exit");
        let session = rec.finish(Some(1), 0, 10).unwrap();
        assert_eq!(session.commands, vec!["whoami"]);
    }

    #[test]
    fn transcript_keeps_output_verbatim() {
        let mut rec = CommandRecorder::new();
        rec.record_output(b"\x1b[1mhi\x1b[0m\r\n");
        rec.record_output(&[0xff, 0x00]);
        assert_eq!(rec.transcript(), b"\x1b[1mhi\x1b[0m\r\n\xff\x00");
    }

    #[test]
    fn finish_requires_identity_and_commands() {
        let mut with_cmd = CommandRecorder::new();
        with_cmd.feed_input(b"ls\r");
        assert!(with_cmd.finish(None, 0, 1).is_none());

        let mut without_cmd = CommandRecorder::new();
        without_cmd.feed_input(b"ls");
        without_cmd.record_output(b"output");
        assert!(without_cmd.finish(Some(3), 0, 1).is_none());

        let mut ok = CommandRecorder::new();
        ok.feed_input(b"ls\r");
        ok.record_output(b"a b c");
        let session = ok.finish(Some(3), 100, 200).unwrap();
        assert_eq!(session.user_id, 3);
        assert_eq!(session.output, b"a b c");
        assert_eq!(session.created_at, 100);
        assert_eq!(session.ended_at, 200);
    }

    #[test]
    fn elapsed_rounds_to_seconds() {
        assert_eq!(format_elapsed(Duration::from_millis(0)), "0s");
        assert_eq!(format_elapsed(Duration::from_millis(1_499)), "1s");
        assert_eq!(format_elapsed(Duration::from_millis(64_500)), "1m5s");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 2)), "3h0m2s");
        assert_eq!(
            session_details(Duration::from_secs(65), 3),
            "Terminal Session (1m5s) - 3 cmds"
        );
    }

    #[tokio::test]
    async fn persist_links_log_to_session() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut rec = CommandRecorder::new();
        rec.feed_input(b"ls\rpwd\r");
        rec.record_output(b"file\r\n/root\r\n");
        let session = rec.finish(Some(9), 1_000, 66_000).unwrap();

        let ids = persist_session(&store, &session, Duration::from_secs(65))
            .await
            .unwrap();

        let log = store.get_log(ids.log_id).await.unwrap().unwrap();
        assert_eq!(log.action, "TERMINAL_SESSION");
        assert_eq!(log.target, "System");
        assert_eq!(log.details, "Terminal Session (1m5s) - 2 cmds");
        assert_eq!(log.terminal_session_id, Some(ids.session_id));

        let stored = store
            .get_terminal_session(ids.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.commands, vec!["ls", "pwd"]);
        assert_eq!(stored.output, b"file\r\n/root\r\n");

        assert!(store.delete_log(ids.log_id).await.unwrap());
        assert!(
            store
                .get_terminal_session(ids.session_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}

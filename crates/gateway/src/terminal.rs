use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, StreamExt},
    hostdeck_store::now_ms,
    hostdeck_terminal::{
        CommandRecorder, Pty, PtyCommand, PtyOptions, parse_resize, persist_session,
    },
    serde_json::json,
    tokio::sync::mpsc,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{auth::Identity, state::GatewayState};

/// Queue depth between the PTY threads and the socket tasks.
const PTY_CHANNEL_DEPTH: usize = 64;
/// How long teardown waits for the killed shell to be reaped.
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Bridge the socket to a shell on a fresh PTY, then persist what the user
/// typed once either side goes away.
pub async fn handle_terminal(
    mut socket: WebSocket,
    state: Arc<GatewayState>,
    identity: Option<Identity>,
) {
    let cfg = &state.config.terminal;
    let opts = PtyOptions {
        shell: cfg.shell.clone(),
        args: cfg.args.clone(),
        cols: cfg.cols,
        rows: cfg.rows,
    };

    // ── Starting ─────────────────────────────────────────────────────────────
    let spawned = tokio::task::spawn_blocking(move || Pty::spawn(&opts))
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r.map_err(|e| e.to_string()));
    let pty = match spawned {
        Ok(pty) => pty,
        Err(e) => {
            warn!(error = %e, "terminal: pty spawn failed");
            let frame = json!({"type": "error", "data": "Failed to start pty"}).to_string();
            let _ = socket.send(Message::Text(frame.into())).await;
            return;
        },
    };
    let started = Instant::now();
    let started_at = now_ms();
    let (reader, control, child) = pty.split();
    info!(pid = ?child.pid(), "terminal: shell started");

    // ── Running ──────────────────────────────────────────────────────────────
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(PTY_CHANNEL_DEPTH);
    let (cmd_tx, cmd_rx) = mpsc::channel::<PtyCommand>(PTY_CHANNEL_DEPTH);
    let reader_task = tokio::task::spawn_blocking(move || reader.pump(out_tx));
    let control_task = tokio::task::spawn_blocking(move || control.run(cmd_rx));

    let cancel = CancellationToken::new();
    let (mut sink, mut stream) = socket.split();

    // PTY → client. Owns the transcript so output order is preserved.
    let output = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut transcript = Vec::new();
            let mut pty_closed = false;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    chunk = out_rx.recv() => {
                        let Some(chunk) = chunk else {
                            pty_closed = true;
                            break;
                        };
                        transcript.extend_from_slice(&chunk);
                        if sink.send(Message::Binary(chunk.into())).await.is_err() {
                            break;
                        }
                    },
                }
            }
            cancel.cancel();
            if pty_closed {
                let _ = sink.send(Message::Close(None)).await;
            }
            transcript
        }
    });

    // Client → PTY. Owns the command recorder.
    let input = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let mut recorder = CommandRecorder::new();
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = stream.next() => msg,
                };
                let bytes = match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((cols, rows)) = parse_resize(text.as_str()) {
                            if cmd_tx.send(PtyCommand::Resize { cols, rows }).await.is_err() {
                                break;
                            }
                            continue;
                        }
                        text.as_str().as_bytes().to_vec()
                    },
                    Some(Ok(Message::Binary(data))) => data.to_vec(),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(error = %e, "terminal: read error");
                        break;
                    },
                };
                recorder.feed_input(&bytes);
                if cmd_tx.send(PtyCommand::Input(bytes)).await.is_err() {
                    break;
                }
            }
            cancel.cancel();
            // Dropping cmd_tx ends the control thread, which closes the master.
            drop(cmd_tx);
            recorder
        }
    });

    let (transcript, recorder) = tokio::join!(output, input);

    // ── Closing ──────────────────────────────────────────────────────────────
    if let Err(e) = tokio::task::spawn_blocking(move || child.terminate(REAP_GRACE)).await {
        warn!(error = %e, "terminal: shell teardown task failed");
    }
    let _ = control_task.await;
    // A background job that inherited the slave keeps the reader blocked; its
    // thread stays parked until that job exits.
    if tokio::time::timeout(REAP_GRACE, reader_task).await.is_err() {
        warn!("terminal: pty reader still blocked after teardown, leaving it behind");
    }

    let (transcript, mut recorder) = match (transcript, recorder) {
        (Ok(t), Ok(r)) => (t, r),
        (t, r) => {
            warn!(
                output_failed = t.is_err(),
                input_failed = r.is_err(),
                "terminal: bridge task panicked, session not recorded"
            );
            return;
        },
    };
    recorder.record_output(&transcript);
    let commands = recorder.commands().len();

    // ── Terminated ───────────────────────────────────────────────────────────
    let Some(session) = recorder.finish(identity.map(|i| i.id), started_at, now_ms()) else {
        debug!(commands, "terminal: nothing to record");
        return;
    };
    match persist_session(state.audit.as_ref(), &session, started.elapsed()).await {
        Ok(ids) => info!(
            session_id = ids.session_id,
            log_id = ids.log_id,
            commands,
            "terminal: session recorded"
        ),
        Err(e) => warn!(error = %e, "terminal: failed to record session"),
    }
}

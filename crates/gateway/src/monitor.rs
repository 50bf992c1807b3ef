use std::{sync::Arc, time::Duration};

use {
    axum::extract::ws::{Message, WebSocket},
    hostdeck_monitor::{Sampler, Update},
    tokio::time::{MissedTickBehavior, interval},
    tracing::{debug, warn},
};

use crate::state::GatewayState;

/// Push a metrics snapshot every `monitor.interval_secs` until the client
/// goes away or a write fails. Client messages are ignored except close.
pub async fn handle_monitor(mut socket: WebSocket, state: Arc<GatewayState>) {
    let cfg = &state.config.monitor;
    let top = cfg.top_processes;
    // Built lazily on the blocking pool: sysinfo setup reads /proc.
    let mut sampler: Option<Sampler> = None;
    let mut ticker = interval(Duration::from_secs(cfg.interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let previous = sampler.take();
                let sampled = tokio::task::spawn_blocking(move || {
                    let mut current = previous.unwrap_or_else(|| Sampler::new(top));
                    let snapshot = current.sample();
                    (current, snapshot)
                })
                .await;
                let (current, snapshot) = match sampled {
                    Ok(out) => out,
                    Err(e) => {
                        warn!(error = %e, "metrics sampling task failed");
                        break;
                    },
                };
                sampler = Some(current);

                let frame = match serde_json::to_string(&Update::from(snapshot)) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, "failed to encode metrics update");
                        continue;
                    },
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    debug!("monitor: client write failed");
                    break;
                }
            },
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "monitor: read error");
                    break;
                },
                Some(Ok(_)) => {},
            },
        }
    }
}

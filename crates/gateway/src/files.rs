use std::sync::Arc;

use {
    axum::extract::ws::{Message, WebSocket},
    tracing::{debug, warn},
};

use crate::{auth::Identity, state::GatewayState};

/// One reply per text frame, in request order. Binary frames are ignored.
pub async fn handle_files(mut socket: WebSocket, state: Arc<GatewayState>, identity: Option<Identity>) {
    let actor = identity.map(|i| i.id);
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "files: read error");
                break;
            },
        };
        let response = state.files.handle_text(actor, text.as_str()).await;
        let frame = match serde_json::to_string(&response) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(action = %response.action, error = %e, "files: failed to encode reply");
                continue;
            },
        };
        if socket.send(Message::Text(frame.into())).await.is_err() {
            debug!("files: client write failed");
            break;
        }
    }
}

//! `/ws` upgrade endpoint: resolves the caller, then hands the connection to
//! exactly one protocol handler chosen by the `type` query parameter.

use std::{fmt, net::SocketAddr, str::FromStr, sync::Arc, time::Instant};

use {
    axum::{
        extract::{
            ConnectInfo, Query, State,
            ws::{Message, WebSocket, WebSocketUpgrade},
        },
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    tracing::{Instrument, debug, info, info_span, warn},
};

use crate::{
    api::ApiError,
    auth::Identity,
    files::handle_files,
    monitor::handle_monitor,
    state::{ConnectedClient, GatewayState},
    terminal::handle_terminal,
};

/// Protocol selected at upgrade time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Monitor,
    Terminal,
    Files,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Terminal => "terminal",
            Self::Files => "files",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown protocol selector: {0:?}")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "monitor" => Ok(Self::Monitor),
            "terminal" => Ok(Self::Terminal),
            "files" => Ok(Self::Files),
            other => Err(UnknownProtocol(other.to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let identity = match state.identity.identify(&headers) {
        Ok(identity) => Some(identity),
        Err(e) if state.config.auth.require_identity => {
            debug!(remote = %addr, error = %e, "ws upgrade rejected");
            return ApiError::Unauthorized(e).into_response();
        },
        Err(e) => {
            debug!(remote = %addr, error = %e, "anonymous ws connection");
            None
        },
    };
    let protocol = query.kind.as_deref().unwrap_or_default().parse::<Protocol>();
    ws.on_upgrade(move |socket| async move {
        match protocol {
            Ok(protocol) => handle_connection(socket, state, protocol, identity, addr).await,
            Err(e) => reject(socket, addr, e).await,
        }
    })
}

/// Unknown selector: close straight away without invoking any handler.
async fn reject(mut socket: WebSocket, addr: SocketAddr, err: UnknownProtocol) {
    warn!(remote = %addr, error = %err, "closing ws connection");
    let _ = socket.send(Message::Close(None)).await;
}

/// Own the connection for its lifetime: register it, run the protocol
/// handler, unregister.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    protocol: Protocol,
    identity: Option<Identity>,
    remote_addr: SocketAddr,
) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("ws", conn_id = %conn_id, protocol = %protocol);

    async move {
        state
            .register_client(ConnectedClient {
                conn_id: conn_id.clone(),
                protocol,
                identity,
                remote_addr,
                connected_at: Instant::now(),
            })
            .await;
        info!(
            remote = %remote_addr,
            user_id = identity.map(|i| i.id),
            "ws: connection open"
        );

        match protocol {
            Protocol::Monitor => handle_monitor(socket, Arc::clone(&state)).await,
            Protocol::Terminal => handle_terminal(socket, Arc::clone(&state), identity).await,
            Protocol::Files => handle_files(socket, Arc::clone(&state), identity).await,
        }

        let duration = state
            .remove_client(&conn_id)
            .await
            .map(|c| c.connected_at.elapsed())
            .unwrap_or_default();
        info!(duration_ms = duration.as_millis() as u64, "ws: connection closed");
    }
    .instrument(span)
    .await
}

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use {
    futures::{SinkExt, StreamExt},
    hostdeck_config::HostdeckConfig,
    hostdeck_gateway::{
        GatewayState, Identity, JwtIdentityProvider, Role, build_gateway_app, sign_token,
    },
    hostdeck_store::{
        AuditStore, LogFilter, NewActivityLog, NewTerminalSession, SettingsStore, SqliteStore,
        actions,
    },
    reqwest::StatusCode,
    secrecy::Secret,
    serde_json::{Value, json},
    tokio_tungstenite::{
        connect_async,
        tungstenite::{self, Message, client::IntoClientRequest},
    },
};

const SECRET: &str = "integration-test-secret";

struct TestGateway {
    addr: SocketAddr,
    store: SqliteStore,
    client: reqwest::Client,
}

impl TestGateway {
    async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    async fn start_with(configure: impl FnOnce(&mut HostdeckConfig)) -> Self {
        let store = SqliteStore::in_memory().await.unwrap();
        let secret = Secret::new(SECRET.to_string());
        let mut config = HostdeckConfig::default();
        config.auth.secret = Some(secret.clone());
        config.terminal.shell = "/bin/sh".into();
        configure(&mut config);
        let identity = Arc::new(JwtIdentityProvider::new(
            secret,
            config.auth.cookie_name.clone(),
        ));
        let state = GatewayState::new(
            config,
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            identity,
        );
        let app = build_gateway_app(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            store,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn ws_request(
        &self,
        selector: &str,
        token: Option<&str>,
    ) -> tungstenite::handshake::client::Request {
        let mut req = format!("ws://{}/ws?type={selector}", self.addr)
            .into_client_request()
            .unwrap();
        if let Some(token) = token {
            req.headers_mut()
                .insert("cookie", format!("jwt={token}").parse().unwrap());
        }
        req
    }

    async fn connections(&self) -> u64 {
        let body: Value = self
            .client
            .get(self.url("/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        body["connections"].as_u64().unwrap()
    }

    /// Polls `/health` until the live count reaches `n`; returns the last count.
    async fn wait_for_connections(&self, n: u64) -> u64 {
        let mut seen = self.connections().await;
        for _ in 0..250 {
            if seen == n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(40)).await;
            seen = self.connections().await;
        }
        seen
    }
}

fn token(id: i64, role: Role) -> String {
    sign_token(
        Identity { id, role },
        &Secret::new(SECRET.to_string()),
        3600,
    )
}

async fn next_text<S>(ws: &mut S) -> Value
where
    S: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a reply")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

// ── WebSocket ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn files_write_is_audited_and_versioned() {
    let gw = TestGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let path_str = path.to_str().unwrap().to_string();

    let (mut ws, _) = connect_async(gw.ws_request("files", Some(&token(7, Role::User))))
        .await
        .unwrap();
    let req = json!({
        "action": "write",
        "path": path_str,
        "content": "hello",
        "data": { "requestId": 1 },
    });
    ws.send(Message::Text(req.to_string().into())).await.unwrap();

    let reply = next_text(&mut ws).await;
    assert_eq!(reply["action"], "write");
    assert_eq!(reply["success"], true);
    assert_eq!(reply["requestId"], 1);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");

    let logs = gw
        .store
        .list_logs(&LogFilter {
            user_id: Some(7),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, actions::FILE_WRITE);
    assert_eq!(logs[0].target, path_str);

    let versions = gw.store.list_file_versions(&path_str).await.unwrap();
    assert_eq!(versions.len(), 1);
    assert_eq!(versions[0].log_id, logs[0].id);
    assert_eq!(versions[0].size, 5);
}

#[tokio::test]
async fn files_replies_follow_request_order() {
    let gw = TestGateway::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), "aaa").unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let (mut ws, _) = connect_async(gw.ws_request("files", Some(&token(1, Role::User))))
        .await
        .unwrap();
    for (n, action) in ["list", "stats", "nonsense"].iter().enumerate() {
        let req = json!({ "action": action, "path": dir_str, "data": { "requestId": n } });
        ws.send(Message::Text(req.to_string().into())).await.unwrap();
    }

    let list = next_text(&mut ws).await;
    assert_eq!(list["action"], "list");
    assert_eq!(list["path"], dir_str);
    assert_eq!(list["data"][0]["name"], "a.txt");

    let stats = next_text(&mut ws).await;
    assert_eq!(stats["action"], "stats");
    assert_eq!(stats["data"]["fileCount"], 1);

    let bad = next_text(&mut ws).await;
    assert!(bad["error"].is_string());
}

#[tokio::test]
async fn unknown_selector_is_closed() {
    let gw = TestGateway::start().await;
    let (mut ws, _) = connect_async(gw.ws_request("chat", Some(&token(1, Role::User))))
        .await
        .unwrap();

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("server never closed the socket");
    match next {
        None | Some(Ok(Message::Close(_))) | Some(Err(_)) => {},
        Some(Ok(other)) => panic!("unexpected frame: {other:?}"),
    }
}

#[tokio::test]
async fn upgrade_without_identity_is_rejected() {
    let gw = TestGateway::start().await;
    match connect_async(gw.ws_request("monitor", None)).await {
        Err(tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status().as_u16(), 401);
        },
        other => panic!("expected http 401, got {:?}", other.map(|(_, r)| r.status())),
    }

    match connect_async(gw.ws_request("monitor", Some("not.a.token"))).await {
        Err(tungstenite::Error::Http(resp)) => {
            assert_eq!(resp.status().as_u16(), 401);
        },
        other => panic!("expected http 401, got {:?}", other.map(|(_, r)| r.status())),
    }
}

#[tokio::test]
async fn monitor_pushes_snapshots() {
    let gw = TestGateway::start().await;
    let (mut ws, _) = connect_async(gw.ws_request("monitor", Some(&token(1, Role::User))))
        .await
        .unwrap();

    let update = next_text(&mut ws).await;
    assert_eq!(update["type"], "update");
    assert!(update["data"]["cpu"]["usage"].is_number());
    assert!(update["data"]["memory"]["total"].as_u64().unwrap() > 0);
    assert!(update["data"]["processes"].as_array().unwrap().len() <= 10);
}

#[tokio::test]
async fn health_counts_live_connections() {
    let gw = TestGateway::start().await;
    assert_eq!(gw.connections().await, 0);

    let (mut ws, _) = connect_async(gw.ws_request("files", Some(&token(1, Role::User))))
        .await
        .unwrap();
    assert_eq!(gw.wait_for_connections(1).await, 1);

    ws.close(None).await.unwrap();
    drop(ws);
    assert_eq!(gw.wait_for_connections(0).await, 0);
}

async fn read_output_until<S>(ws: &mut S, needle: &str) -> Vec<u8>
where
    S: StreamExt<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let mut seen = Vec::new();
    let found = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Binary(chunk) = msg {
                seen.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&seen).contains(needle) {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "terminal output: {}", String::from_utf8_lossy(&seen));
    seen
}

#[tokio::test]
async fn terminal_session_is_recorded_on_close() {
    let gw = TestGateway::start().await;
    let (mut ws, _) = connect_async(gw.ws_request("terminal", Some(&token(5, Role::User))))
        .await
        .unwrap();

    let resize = json!({ "type": "resize", "cols": 120, "rows": 40 });
    ws.send(Message::Text(resize.to_string().into())).await.unwrap();
    ws.send(Message::Binary(b"echo hostdeck-$((40+2))\r".to_vec().into()))
        .await
        .unwrap();
    read_output_until(&mut ws, "hostdeck-42").await;

    ws.close(None).await.unwrap();
    drop(ws);
    // The handler persists before it unregisters the connection.
    assert_eq!(gw.wait_for_connections(0).await, 0);

    let logs = gw
        .store
        .list_logs(&LogFilter {
            user_id: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, actions::TERMINAL_SESSION);
    assert_eq!(logs[0].target, "System");
    assert!(logs[0].details.ends_with("- 1 cmds"), "{}", logs[0].details);

    let session_id = logs[0].terminal_session_id.unwrap();
    let session = gw
        .store
        .get_terminal_session(session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.user_id, 5);
    assert_eq!(session.commands, vec!["echo hostdeck-$((40+2))"]);
    assert!(String::from_utf8_lossy(&session.output).contains("hostdeck-42"));
}

#[tokio::test]
async fn anonymous_terminal_leaves_no_record() {
    let gw = TestGateway::start_with(|config| config.auth.require_identity = false).await;
    let (mut ws, _) = connect_async(gw.ws_request("terminal", None)).await.unwrap();

    ws.send(Message::Binary(b"ls; echo done-$((1+1))\r".to_vec().into()))
        .await
        .unwrap();
    read_output_until(&mut ws, "done-2").await;

    ws.close(None).await.unwrap();
    drop(ws);
    assert_eq!(gw.wait_for_connections(0).await, 0);

    let logs = gw.store.list_logs(&LogFilter::default()).await.unwrap();
    assert!(logs.is_empty(), "{logs:?}");
    assert!(gw.store.get_terminal_session(1).await.unwrap().is_none());
}

// ── REST ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn logs_are_scoped_to_the_caller() {
    let gw = TestGateway::start().await;
    for user in [1, 2, 2] {
        gw.store
            .create_log(&NewActivityLog::new(user, actions::FILE_WRITE, "/tmp/x", "w"))
            .await
            .unwrap();
    }

    let res = gw.client.get(gw.url("/api/logs")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert!(body["message"].is_string());

    let mine: Vec<Value> = gw
        .client
        .get(gw.url("/api/logs"))
        .bearer_auth(token(2, Role::User))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(mine.len(), 2);
    assert!(mine.iter().all(|l| l["user_id"] == 2));

    let all: Vec<Value> = gw
        .client
        .get(gw.url("/api/logs"))
        .bearer_auth(token(9, Role::Admin))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn deleting_a_log_removes_its_session() {
    let gw = TestGateway::start().await;
    let session_id = gw
        .store
        .create_terminal_session(&NewTerminalSession::new(
            3,
            vec!["ls".into()],
            b"out".to_vec(),
            1,
            2,
        ))
        .await
        .unwrap();
    let log_id = gw
        .store
        .create_log(
            &NewActivityLog::new(3, actions::TERMINAL_SESSION, "System", "Terminal Session")
                .with_session(session_id),
        )
        .await
        .unwrap();

    let session: Value = gw
        .client
        .get(gw.url(&format!("/api/sessions/{session_id}")))
        .bearer_auth(token(3, Role::User))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(session["commands"], json!(["ls"]));

    let res = gw
        .client
        .delete(gw.url(&format!("/api/logs/{log_id}")))
        .bearer_auth(token(3, Role::User))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = gw
        .client
        .delete(gw.url(&format!("/api/logs/{log_id}")))
        .bearer_auth(token(1, Role::Admin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(gw.store.get_log(log_id).await.unwrap().is_none());
    assert!(
        gw.store
            .get_terminal_session(session_id)
            .await
            .unwrap()
            .is_none()
    );

    let res = gw
        .client
        .delete(gw.url(&format!("/api/logs/{log_id}")))
        .bearer_auth(token(1, Role::Admin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn file_history_requires_a_path() {
    let gw = TestGateway::start().await;
    let res = gw
        .client
        .get(gw.url("/api/files/history"))
        .bearer_auth(token(1, Role::User))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = gw
        .client
        .get(gw.url("/api/files/version/999"))
        .bearer_auth(token(1, Role::User))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn kill_rejects_bad_pids_and_non_admins() {
    let gw = TestGateway::start().await;
    let res = gw
        .client
        .post(gw.url("/api/monitor/kill/1"))
        .bearer_auth(token(1, Role::User))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = gw
        .client
        .post(gw.url("/api/monitor/kill/abc"))
        .bearer_auth(token(1, Role::Admin))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid PID");
}

#[tokio::test]
async fn settings_mask_secrets_and_ignore_echoes() {
    let gw = TestGateway::start().await;
    gw.store
        .set_setting("GEMINI_API_KEY", "abcdefghijkl")
        .await
        .unwrap();

    let settings: Value = gw
        .client
        .get(gw.url("/api/settings"))
        .bearer_auth(token(1, Role::Admin))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(settings["GEMINI_API_KEY"], "sk-...ijkl");

    let res = gw
        .client
        .post(gw.url("/api/settings"))
        .bearer_auth(token(1, Role::Admin))
        .json(&json!({ "GEMINI_API_KEY": "sk-...ijkl", "AI_MODEL": "flash" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        gw.store.get_setting("GEMINI_API_KEY").await.unwrap().as_deref(),
        Some("abcdefghijkl")
    );
    assert_eq!(
        gw.store.get_setting("AI_MODEL").await.unwrap().as_deref(),
        Some("flash")
    );
}

#[tokio::test]
async fn services_are_listed_for_any_caller() {
    let gw = TestGateway::start().await;
    let res = gw
        .client
        .get(gw.url("/api/monitor/services"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let services: Vec<Value> = gw
        .client
        .get(gw.url("/api/monitor/services"))
        .bearer_auth(token(1, Role::User))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(services.len(), 6);
    assert_eq!(services[0]["name"], "nginx");
    assert_eq!(services[0]["display_name"], "Nginx Web Server");
    assert!(services.iter().all(|s| s["status"].is_string()));
}

#[tokio::test]
async fn service_actions_are_validated() {
    let gw = TestGateway::start().await;
    let post = |path: &str, role: Role| {
        gw.client
            .post(gw.url(path))
            .bearer_auth(token(1, role))
            .send()
    };

    let res = post("/api/monitor/services/nginx/restart", Role::User).await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = post("/api/monitor/services/nginx/mask", Role::Admin).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Invalid action");

    let res = post("/api/monitor/services/cron/restart", Role::Admin).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["message"], "Service not managed");

    // Rejected requests never reach the audit trail.
    assert!(gw.store.list_logs(&LogFilter::default()).await.unwrap().is_empty());
}

use std::{net::SocketAddr, sync::Arc};

use {
    anyhow::Context,
    axum::{
        Router,
        extract::State,
        response::{IntoResponse, Json},
        routing::{delete, get, post},
    },
    hostdeck_config::{HostdeckConfig, SECRET_ENV},
    hostdeck_store::SqliteStore,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::info,
};

use crate::{
    api,
    auth::{IdentityProvider, JwtIdentityProvider},
    state::GatewayState,
    ws::ws_upgrade_handler,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = Router::new()
        .route("/logs", get(api::list_logs))
        .route("/logs/{id}", delete(api::delete_log))
        .route("/files/history", get(api::file_history))
        .route("/files/version/{id}", get(api::file_version))
        .route("/sessions/{id}", get(api::terminal_session))
        .route("/monitor/kill/{pid}", post(api::kill))
        .route("/monitor/services", get(api::list_services))
        .route("/monitor/services/{name}/{action}", post(api::manage))
        .route("/settings", get(api::get_settings).post(api::update_settings));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_upgrade_handler))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Identity provider from the configured secret. Startup fails without one.
pub fn identity_provider(config: &HostdeckConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    let secret = config.auth.secret.clone().with_context(|| {
        format!("no identity secret configured: set {SECRET_ENV} or auth.secret")
    })?;
    Ok(Arc::new(JwtIdentityProvider::new(
        secret,
        config.auth.cookie_name.clone(),
    )))
}

/// Start the gateway HTTP + WebSocket server and run until Ctrl-C.
pub async fn start_gateway(config: HostdeckConfig) -> anyhow::Result<()> {
    let identity = identity_provider(&config)?;

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let require_identity = config.auth.require_identity;
    let state = GatewayState::new(
        config,
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        identity,
    );
    let app = build_gateway_app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Startup banner.
    let lines = [
        format!("hostdeck gateway v{}", state.version),
        format!("host {}, listening on {}", state.hostname, addr),
        format!("database: {}", db_path.display()),
        format!(
            "identity: {}",
            if require_identity {
                "required"
            } else {
                "optional"
            }
        ),
    ];
    let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
    info!("┌{}┐", "─".repeat(width));
    for line in &lines {
        info!("│  {:<w$}│", line, w = width - 2);
    }
    info!("└{}┘", "─".repeat(width));

    // Run the server with ConnectInfo for remote IP extraction.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("gateway stopped, closing database");
    store.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let count = state.client_count().await;
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": count,
    }))
}

//! REST surface over the audit trail, settings, process and service control.
//!
//! Every route requires a valid identity; destructive routes require the
//! admin role. Errors render as `{"message": ...}` with a matching status.

use std::{collections::BTreeMap, sync::Arc};

use {
    axum::{
        Json,
        extract::{FromRequestParts, Path, Query, State},
        http::{StatusCode, request::Parts},
        response::{IntoResponse, Response},
    },
    hostdeck_monitor::{
        KillError, ServiceAction, ServiceError, ServiceStatus, kill_process, manage_service,
        service_statuses, tracked_service,
    },
    hostdeck_store::{
        ActivityLogEntry, FileVersion, FileVersionSummary, LogFilter, NewActivityLog, StoreError,
        TerminalSession, actions,
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use crate::{
    auth::{AuthError, Identity},
    state::GatewayState,
};

/// Prefix marking a masked secret in settings replies.
const MASK_PREFIX: &str = "sk-...";

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthenticated")]
    Unauthorized(#[source] AuthError),

    #[error("Admin access required")]
    Forbidden,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Kill(#[from] KillError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("storage failure")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) | Self::Kill(KillError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Service(e) if e.is_invalid_request() => StatusCode::BAD_REQUEST,
            Self::Kill(KillError::Signal(_))
            | Self::Service(_)
            | Self::Store(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(error = ?self, "api request failed");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

// ── Extractors ───────────────────────────────────────────────────────────────

/// Any authenticated caller.
pub struct Caller(pub Identity);

impl FromRequestParts<Arc<GatewayState>> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        state
            .identity
            .identify(&parts.headers)
            .map(Caller)
            .map_err(ApiError::Unauthorized)
    }
}

/// Authenticated caller with the admin role.
pub struct Admin(pub Identity);

impl FromRequestParts<Arc<GatewayState>> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<GatewayState>,
    ) -> Result<Self, Self::Rejection> {
        let Caller(identity) = Caller::from_request_parts(parts, state).await?;
        if !identity.is_admin() {
            return Err(ApiError::Forbidden);
        }
        Ok(Admin(identity))
    }
}

// ── Activity log ─────────────────────────────────────────────────────────────

/// Admins see everyone's latest entries, users only their own.
pub async fn list_logs(
    Caller(caller): Caller,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<ActivityLogEntry>>, ApiError> {
    let filter = LogFilter {
        user_id: (!caller.is_admin()).then_some(caller.id),
        ..Default::default()
    };
    Ok(Json(state.audit.list_logs(&filter).await?))
}

pub async fn delete_log(
    Admin(admin): Admin,
    Path(id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, ApiError> {
    if !state.audit.delete_log(id).await? {
        return Err(ApiError::NotFound("Log not found"));
    }
    info!(log_id = id, admin = admin.id, "activity log entry deleted");
    Ok(Json(json!({ "message": "Log deleted" })))
}

// ── File versions ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub path: Option<String>,
}

pub async fn file_history(
    Caller(_): Caller,
    Query(query): Query<HistoryQuery>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Vec<FileVersionSummary>>, ApiError> {
    let path = query
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("path required".into()))?;
    Ok(Json(state.audit.list_file_versions(&path).await?))
}

pub async fn file_version(
    Caller(_): Caller,
    Path(id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<FileVersion>, ApiError> {
    state
        .audit
        .get_file_version(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Version not found"))
}

// ── Terminal sessions ────────────────────────────────────────────────────────

pub async fn terminal_session(
    Caller(_): Caller,
    Path(id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<TerminalSession>, ApiError> {
    state
        .audit
        .get_terminal_session(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound("Session not found"))
}

// ── Process control ──────────────────────────────────────────────────────────

pub async fn kill(
    Admin(admin): Admin,
    Path(pid): Path<String>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, ApiError> {
    let pid_num: u32 = pid
        .parse()
        .map_err(|_| ApiError::BadRequest("Invalid PID".into()))?;
    tokio::task::spawn_blocking(move || kill_process(pid_num))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    state
        .audit
        .create_log(&NewActivityLog::new(
            admin.id,
            actions::PROCESS_KILL,
            pid,
            "Killed process via Monitor",
        ))
        .await?;
    info!(pid = pid_num, admin = admin.id, "process killed");
    Ok(Json(json!({ "message": "Process killed successfully" })))
}

// ── Services ─────────────────────────────────────────────────────────────────

pub async fn list_services(Caller(_): Caller) -> Json<Vec<ServiceStatus>> {
    Json(service_statuses().await)
}

/// The action is checked before the unit name; neither reaches `systemctl`
/// unless both are on their allowlists.
pub async fn manage(
    Admin(admin): Admin,
    Path((name, action)): Path<(String, String)>,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, ApiError> {
    let action: ServiceAction = action.parse()?;
    let service = tracked_service(&name)?;
    manage_service(action, service).await?;

    state
        .audit
        .create_log(&NewActivityLog::new(
            admin.id,
            actions::SERVICE_MANAGE,
            service.name,
            format!("{action} service"),
        ))
        .await?;
    info!(service = service.name, %action, admin = admin.id, "service managed");
    Ok(Json(json!({
        "message": format!("Service {} {}", service.name, action.past_tense())
    })))
}

// ── Settings ─────────────────────────────────────────────────────────────────

fn is_secret_key(key: &str) -> bool {
    key.ends_with("_KEY") || key.ends_with("_TOKEN") || key.ends_with("_SECRET")
}

/// Hide all but the last four characters of long secret values.
pub fn mask_setting(key: &str, value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if !is_secret_key(key) || chars.len() <= 8 {
        return value.to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{MASK_PREFIX}{tail}")
}

pub async fn get_settings(
    Admin(_): Admin,
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    let settings = state.settings.list_settings().await?;
    Ok(Json(
        settings
            .into_iter()
            .map(|s| {
                let masked = mask_setting(&s.key, &s.value);
                (s.key, masked)
            })
            .collect(),
    ))
}

/// Upsert each pair. Echoed masked secrets are skipped so a round trip
/// through the settings form never overwrites the real value.
pub async fn update_settings(
    Admin(admin): Admin,
    State(state): State<Arc<GatewayState>>,
    Json(payload): Json<BTreeMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    for (key, value) in &payload {
        if is_secret_key(key) && value.starts_with(MASK_PREFIX) {
            continue;
        }
        state.settings.set_setting(key, value).await?;
    }
    info!(admin = admin.id, keys = payload.len(), "settings updated");
    Ok(Json(json!({ "message": "Settings updated" })))
}

#[cfg(test)]
mod tests {
    use {super::*, axum::body::to_bytes};

    #[test]
    fn masks_only_long_secrets() {
        assert_eq!(mask_setting("GEMINI_API_KEY", "abcdefghijkl"), "sk-...ijkl");
        assert_eq!(mask_setting("GEMINI_API_KEY", "short"), "short");
        assert_eq!(mask_setting("AI_MODEL", "gemini-2.0-flash"), "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn error_body_is_message_json() {
        let res = ApiError::NotFound("Log not found").into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(res.into_body(), 1024).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "message": "Log not found" }));
    }

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Unauthorized(AuthError::Missing).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::Kill(KillError::NotFound(1)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Service(ServiceError::NotManaged("cron".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Service(ServiceError::Failed {
                action: ServiceAction::Stop,
                name: "nginx".into(),
                reason: "exit status: 1".into(),
            })
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}

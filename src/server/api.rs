//! WebDriver handlers
//!
//! Every request under `/wd/hub` goes through [`dispatch`]: local commands
//! are looked up in the route table, session commands are forwarded to the
//! owning device, anything else is an unknown command.

use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Error, WireStatus};
use crate::metrics;
use crate::session::{Capabilities, Session, SessionId};

use super::proxy;
use super::routes::{forwarded_session, Endpoint, RouteMatch, WD_PREFIX};
use super::server::AppState;

// ============================================================================
// Response Envelope
// ============================================================================

/// JSON wire response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub session_id: Option<String>,
    pub status: u32,
    pub value: Value,
}

impl Envelope {
    pub fn success(session_id: Option<&SessionId>, value: Value) -> Self {
        Self {
            session_id: session_id.map(ToString::to_string),
            status: WireStatus::Success.code(),
            value,
        }
    }

    pub fn from_error(error: &Error, session_id: Option<&SessionId>) -> Self {
        Self {
            session_id: session_id.map(ToString::to_string),
            status: error.wire_status().code(),
            value: json!({ "message": error.client_message() }),
        }
    }
}

/// An error rendered as an envelope
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub session_id: Option<SessionId>,
}

impl ApiError {
    fn for_session(error: Error, session_id: &SessionId) -> Self {
        Self {
            error,
            session_id: Some(session_id.clone()),
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            session_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.error.category() == crate::error::ErrorCategory::Internal {
            tracing::error!(error = %self.error, "Internal error while handling request");
        }

        let envelope = Envelope::from_error(&self.error, self.session_id.as_ref());
        (self.error.http_status(), Json(envelope)).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

fn ok(session_id: Option<&SessionId>, value: Value) -> Response {
    (StatusCode::OK, Json(Envelope::success(session_id, value))).into_response()
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .fallback(dispatch)
        .with_state(state)
}

/// Route a request to a local handler or to the session's device
pub async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    if let Some(route) = state.routes.resolve(&method, &path) {
        tracing::debug!(%method, %path, endpoint = route.endpoint.as_str(), "Local command");
        return handle_local(&state, route, request)
            .await
            .unwrap_or_else(IntoResponse::into_response);
    }

    if let Some(id) = forwarded_session(&path) {
        let id = SessionId::from(id);
        return match proxy::forward(&state, &id, request).await {
            Ok(response) => response,
            Err(error) => ApiError::for_session(error, &id).into_response(),
        };
    }

    tracing::debug!(%method, %path, "Unknown command");
    ApiError::from(Error::UnknownCommand {
        method: method.to_string(),
        path,
    })
    .into_response()
}

async fn handle_local(state: &AppState, route: RouteMatch, request: Request) -> ApiResult {
    let session_id = route.param("sessionId").map(SessionId::from);

    match (route.endpoint, session_id) {
        (Endpoint::Status, _) => Ok(status(state)),
        (Endpoint::ListSessions, _) => Ok(list_sessions(state)),
        (Endpoint::CreateSession, _) => create_session(state, request).await,
        (Endpoint::GetSession, Some(id)) => get_session(state, &id),
        (Endpoint::DeleteSession, Some(id)) => delete_session(state, &id).await,
        (Endpoint::ListDevices, _) => Ok(list_devices(state)),
        (Endpoint::RecoverDevice, _) => recover_device(state, route.param("deviceId").unwrap_or_default()),
        (endpoint, None) => Err(Error::other(format!("route {} is missing its session id", endpoint.as_str())).into()),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /wd/hub/status
fn status(state: &AppState) -> Response {
    let supported_apps: Vec<Value> = state
        .apps
        .all()
        .into_iter()
        .map(|app| {
            json!({
                "appId": app.key(),
                "basePackage": app.base_package,
                "mainActivity": app.main_activity,
            })
        })
        .collect();

    let supported_devices: Vec<Value> = state
        .devices
        .snapshot()
        .into_iter()
        .map(|device| {
            json!({
                "serial": device.serial(),
                "emulator": device.is_emulator,
                "screenSize": device.screen_size,
                "platformVersion": device.platform_version,
                "locale": device.locale,
                "state": device.state,
            })
        })
        .collect();

    ok(
        None,
        json!({
            "ready": state.devices.stats().free > 0,
            "build": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "os": {
                "name": std::env::consts::OS,
                "arch": std::env::consts::ARCH,
            },
            "supportedApps": supported_apps,
            "supportedDevices": supported_devices,
        }),
    )
}

/// GET /wd/hub/sessions
fn list_sessions(state: &AppState) -> Response {
    let sessions: Vec<Value> = state
        .sessions
        .list()
        .iter()
        .map(|session| {
            json!({
                "id": session.id,
                "capabilities": session_capabilities(session),
            })
        })
        .collect();

    ok(None, Value::Array(sessions))
}

/// POST /wd/hub/session
async fn create_session(state: &AppState, request: Request) -> ApiResult {
    let bytes = to_bytes(request.into_body(), state.max_body_bytes)
        .await
        .map_err(|e| Error::InvalidCapabilities(format!("unreadable request body: {e}")))?;
    let body: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidCapabilities(format!("request body is not JSON: {e}")))?;

    let capabilities = Capabilities::from_request_body(&body)?;
    let session = state.sessions.create(capabilities).await?;

    let location = format!("{WD_PREFIX}/session/{}", session.id);
    let envelope = Envelope::success(Some(&session.id), session_capabilities(&session));

    Ok((
        StatusCode::SEE_OTHER,
        [(header::LOCATION, location)],
        Json(envelope),
    )
        .into_response())
}

/// GET /wd/hub/session/:sessionId
fn get_session(state: &AppState, id: &SessionId) -> ApiResult {
    let session = state
        .sessions
        .get(id)
        .ok_or_else(|| ApiError::for_session(Error::InvalidSession(id.to_string()), id))?;

    Ok(ok(Some(id), session_capabilities(&session)))
}

/// DELETE /wd/hub/session/:sessionId
async fn delete_session(state: &AppState, id: &SessionId) -> ApiResult {
    state
        .sessions
        .delete(id)
        .await
        .map_err(|e| ApiError::for_session(e, id))?;

    Ok(ok(Some(id), Value::Null))
}

/// GET /wd/hub/devices
fn list_devices(state: &AppState) -> Response {
    let devices = state.devices.snapshot();
    let stats = state.devices.stats();
    metrics::update_device_metrics(&stats);

    ok(None, json!({ "devices": devices, "stats": stats }))
}

/// POST /wd/hub/devices/:deviceId/recover
fn recover_device(state: &AppState, device_id: &str) -> ApiResult {
    let Some(device) = state.devices.get(device_id) else {
        return Err(Error::device_failure(device_id, "unknown device").into());
    };

    let recovered = state.devices.recover(device_id);
    tracing::info!(device = %device_id, recovered, previous_state = %device.state, "Recover requested");

    Ok(ok(
        None,
        json!({ "device": device_id, "recovered": recovered }),
    ))
}

/// Capabilities of a live session as reported to clients
fn session_capabilities(session: &Session) -> Value {
    let mut capabilities = session.capabilities.as_map().clone();
    capabilities.insert("aut".into(), json!(session.app));
    capabilities.insert("serial".into(), json!(session.device.serial()));
    capabilities.insert("emulator".into(), json!(session.device.is_emulator));
    capabilities.insert("screenSize".into(), json!(session.device.screen_size));
    capabilities.insert("platformVersion".into(), json!(session.device.platform_version));
    if let Some(locale) = &session.device.locale {
        capabilities.insert("locale".into(), json!(locale));
    }
    Value::Object(capabilities)
}

// ============================================================================
// Operational endpoints
// ============================================================================

/// GET /health
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();

    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "sessions": state.sessions.len(),
        "devices": state.devices.stats(),
        "apps": state.apps.len(),
    }))
}

/// GET /metrics
async fn metrics_handler() -> Response {
    match metrics::encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            tracing::warn!("Failed to encode metrics: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, Body::from("metrics unavailable")).into_response()
        }
    }
}

//! Forwarding of session commands to device endpoints
//!
//! The request body is sent verbatim and the device's status and body are
//! relayed back unchanged. Only the authority of the URL changes.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    response::Response,
};

use crate::error::{Error, Result};
use crate::metrics;
use crate::session::SessionId;

use super::server::AppState;

/// Headers relayed in both directions
const RELAYED_HEADERS: [header::HeaderName; 3] =
    [header::CONTENT_TYPE, header::ACCEPT, header::CONTENT_ENCODING];

/// Forward a session command to the session's device endpoint
pub async fn forward(state: &AppState, id: &SessionId, request: Request) -> Result<Response> {
    // unknown sessions never reach a device
    let mut target = state.sessions.endpoint_for(id)?;

    let (parts, body) = request.into_parts();
    target.set_path(parts.uri.path());
    target.set_query(parts.uri.query());

    let body = to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|e| Error::with_source("Unreadable request body", e))?;

    tracing::debug!(session = %id, method = %parts.method, url = %target, "Forwarding command");

    let mut outbound = state
        .http
        .request(parts.method.clone(), target.clone())
        .timeout(state.forward_timeout)
        .body(body);
    for name in RELAYED_HEADERS.iter() {
        if let Some(value) = parts.headers.get(name) {
            outbound = outbound.header(name, value);
        }
    }

    let upstream = outbound.send().await.map_err(|e| {
        tracing::warn!(session = %id, url = %target, error = %e, "Device endpoint did not answer");
        Error::EndpointUnreachable {
            session: id.to_string(),
            reason: e.to_string(),
        }
    })?;

    let status = upstream.status();
    let headers = relayed(upstream.headers());
    let bytes = upstream.bytes().await.map_err(|e| Error::EndpointUnreachable {
        session: id.to_string(),
        reason: e.to_string(),
    })?;

    metrics::record_forwarded_request(status.as_u16());

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = status;
    response.headers_mut().extend(headers);
    Ok(response)
}

fn relayed(headers: &HeaderMap<HeaderValue>) -> HeaderMap<HeaderValue> {
    let mut out = HeaderMap::new();
    for name in RELAYED_HEADERS.iter() {
        if let Some(value) = headers.get(name) {
            out.insert(name.clone(), value.clone());
        }
    }
    out
}

//! Routing integration tests through the HTTP front door
//!
//! Sessions are created and commands are sent through the router; device
//! endpoints are wiremock servers that only accept their own session.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use droidpool::device::{DeviceSpec, DeviceState};
use droidpool::server::create_router;

use crate::common::{fast_settings, healthy_endpoint, Harness, APP_PACKAGE, APP_VERSION};

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn create_session(router: &Router, serial: &str) -> String {
    let (status, body) = send(
        router,
        post_json(
            "/wd/hub/session",
            json!({ "desiredCapabilities": { "aut": APP_PACKAGE, "serial": serial } }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SEE_OTHER, "create failed: {body}");
    assert_eq!(body["status"], 0);
    body["sessionId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_commands_reach_only_their_own_device() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("device-a", "320x480", "19"));
    harness
        .devices
        .register_device(DeviceSpec::hardware("device-b", "320x480", "19"));

    let endpoint_a = healthy_endpoint().await;
    let endpoint_b = healthy_endpoint().await;
    harness.bridge.set_endpoint("device-a", &endpoint_a.uri());
    harness.bridge.set_endpoint("device-b", &endpoint_b.uri());

    let router = create_router(harness.app_state());
    let session_a = create_session(&router, "device-a").await;
    let session_b = create_session(&router, "device-b").await;
    assert_ne!(session_a, session_b);

    let navigate = json!({ "url": "and-activity://MainActivity" });
    Mock::given(method("POST"))
        .and(path(format!("/wd/hub/session/{session_a}/url")))
        .and(body_json(navigate.clone()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": session_a,
            "status": 0,
            "value": null
        })))
        .expect(1)
        .mount(&endpoint_a)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/wd/hub/session/{session_b}/screenshot")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionId": session_b,
            "status": 0,
            "value": "iVBORw0KGgo="
        })))
        .expect(2)
        .mount(&endpoint_b)
        .await;

    let (status, body) = send(
        &router,
        post_json(&format!("/wd/hub/session/{session_a}/url"), navigate),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], session_a.as_str());

    let (status, body) = send(&router, get(&format!("/wd/hub/session/{session_b}/screenshot"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"], "iVBORw0KGgo=");

    // deleting one session leaves the other routable
    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/wd/hub/session/{session_a}"))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&router, delete).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        post_json(&format!("/wd/hub/session/{session_a}/url"), json!({ "url": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 6);

    let (status, _) = send(&router, get(&format!("/wd/hub/session/{session_b}/screenshot"))).await;
    assert_eq!(status, StatusCode::OK);

    // expectations are verified when the mock servers drop
}

#[tokio::test]
async fn test_device_errors_are_relayed_verbatim() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("device-a", "320x480", "19"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let router = create_router(harness.app_state());
    let session = create_session(&router, "device-a").await;

    let device_error = json!({
        "sessionId": session,
        "status": 7,
        "value": { "message": "no such element" }
    });
    Mock::given(method("POST"))
        .and(path(format!("/wd/hub/session/{session}/element")))
        .respond_with(ResponseTemplate::new(500).set_body_json(device_error.clone()))
        .mount(&endpoint)
        .await;

    let (status, body) = send(
        &router,
        post_json(
            &format!("/wd/hub/session/{session}/element"),
            json!({ "using": "id", "value": "missing" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, device_error);
}

#[tokio::test]
async fn test_unknown_session_never_reaches_a_device() {
    let harness = Harness::new(fast_settings(), 3);
    let router = create_router(harness.app_state());

    let (status, body) = send(&router, get("/wd/hub/session/nope/url")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 6);
    assert_eq!(body["sessionId"], "nope");

    let (status, body) = send(&router, get("/wd/hub/session/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 6);
}

#[tokio::test]
async fn test_unknown_command() {
    let harness = Harness::new(fast_settings(), 3);
    let router = create_router(harness.app_state());

    let (status, body) = send(&router, get("/wd/hub/teleport")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], 9);
}

#[tokio::test]
async fn test_create_without_app_is_invalid() {
    let harness = Harness::new(fast_settings(), 3);
    let router = create_router(harness.app_state());

    let (status, body) = send(
        &router,
        post_json("/wd/hub/session", json!({ "desiredCapabilities": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["status"], 33);
}

#[tokio::test]
async fn test_no_device_is_session_not_created() {
    let harness = Harness::new(fast_settings(), 3);
    let router = create_router(harness.app_state());

    let (status, body) = send(
        &router,
        post_json(
            "/wd/hub/session",
            json!({ "desiredCapabilities": { "aut": APP_PACKAGE } }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], 33);
    assert!(body["value"]["message"].as_str().unwrap().contains("No available device"));
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let harness = Harness::new(fast_settings(), 3);
    harness
        .devices
        .register_device(DeviceSpec::hardware("device-a", "320x480", "19").with_locale("de_DE"));
    let endpoint = healthy_endpoint().await;
    harness.bridge.set_default_endpoint(&endpoint.uri());

    let router = create_router(harness.app_state());

    let (_, status) = send(&router, get("/wd/hub/status")).await;
    assert_eq!(status["value"]["ready"], true);
    assert_eq!(
        status["value"]["supportedApps"][0]["appId"],
        format!("{APP_PACKAGE}:{APP_VERSION}")
    );

    let session = create_session(&router, "device-a").await;

    let (status, body) = send(&router, get(&format!("/wd/hub/session/{session}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["aut"], format!("{APP_PACKAGE}:{APP_VERSION}"));
    assert_eq!(body["value"]["locale"], "de_DE");
    assert_eq!(body["value"]["emulator"], false);

    let (_, sessions) = send(&router, get("/wd/hub/sessions")).await;
    assert_eq!(sessions["value"].as_array().unwrap().len(), 1);

    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/wd/hub/session/{session}"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&router, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], 0);

    assert_eq!(harness.devices.get("device-a").unwrap().state, DeviceState::Free);
    let (_, sessions) = send(&router, get("/wd/hub/sessions")).await;
    assert!(sessions["value"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_device_over_http() {
    let harness = Harness::new(fast_settings(), 3);
    let broken = harness
        .devices
        .register_device(DeviceSpec::hardware("device-a", "320x480", "19"));
    harness.devices.mark_unhealthy(&broken);
    let router = create_router(harness.app_state());

    let (status, body) = send(&router, post_json("/wd/hub/devices/device-a/recover", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["value"]["recovered"], true);
    assert_eq!(harness.devices.get("device-a").unwrap().state, DeviceState::Free);

    let (_, body) = send(&router, get("/wd/hub/devices")).await;
    assert_eq!(body["value"]["stats"]["free"], 1);
}

//! Hub registration integration tests

use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use droidpool::apps::{AppDescriptor, AppRegistry};
use droidpool::device::{DeviceSpec, DeviceStore};
use droidpool::hub::{HubClient, HubClientConfig, HubRegistrar, RegistrarSettings, RegistrarState};
use droidpool::ports::PortAllocator;

const NODE_URL: &str = "http://10.0.0.5:4444";

fn registrar(hub: &MockServer) -> HubRegistrar {
    let devices = Arc::new(DeviceStore::new(Arc::new(PortAllocator::new(5554, 5584)), 3));
    devices.register_device(DeviceSpec::hardware("phone", "1080x1920", "28"));

    let apps = Arc::new(AppRegistry::new());
    apps.register(AppDescriptor::new("io.example", "1.0", "/apps/example.apk"));

    let client = HubClient::new(HubClientConfig::new(hub.uri()).with_retry_count(0)).unwrap();
    HubRegistrar::new(client, devices, apps, RegistrarSettings::new(NODE_URL))
}

async fn mount_proxy_status(hub: &MockServer, known: bool) {
    Mock::given(method("GET"))
        .and(path("/grid/api/proxy"))
        .and(query_param("id", NODE_URL))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": known })))
        .mount(hub)
        .await;
}

#[tokio::test]
async fn test_registers_once_while_hub_remembers_node() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/grid/register"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&hub)
        .await;
    mount_proxy_status(&hub, true).await;

    let registrar = registrar(&hub);
    assert_eq!(registrar.tick().await, RegistrarState::Registered);
    assert_eq!(registrar.tick().await, RegistrarState::Registered);
    assert_eq!(registrar.tick().await, RegistrarState::Registered);
}

#[tokio::test]
async fn test_re_registers_after_hub_restart() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/grid/register"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&hub)
        .await;
    // a restarted hub no longer knows the node
    mount_proxy_status(&hub, false).await;

    let registrar = registrar(&hub);
    assert_eq!(registrar.tick().await, RegistrarState::Registered);
    assert_eq!(registrar.tick().await, RegistrarState::Registered);
}

#[tokio::test]
async fn test_unreachable_hub_retries_next_tick() {
    let hub = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/grid/register"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&hub)
        .await;

    let registrar = registrar(&hub);
    assert_eq!(registrar.tick().await, RegistrarState::Unregistered);
    assert_eq!(registrar.tick().await, RegistrarState::Unregistered);
}

#[tokio::test]
async fn test_registration_document_lists_device_and_app() {
    let hub = MockServer::start().await;
    let document = registrar(&hub).registration_document();

    assert_eq!(document.capabilities.len(), 1);
    assert_eq!(document.capabilities[0]["aut"], "io.example:1.0");
    assert_eq!(document.capabilities[0]["screenSize"], "1080x1920");
    assert_eq!(document.configuration["url"], NODE_URL);
    assert_eq!(document.configuration["port"], 4444);
}

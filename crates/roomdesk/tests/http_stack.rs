//! `SyncCore` over real HTTP renewal and REST snapshot endpoints.

use std::sync::Arc;
use std::time::Duration;

use roomdesk::auth::{Credential, SessionStatus};
use roomdesk::realtime::testing;
use roomdesk::settings::RoomdeskSettings;
use roomdesk::sync::EntityUpdate;
use roomdesk::{SurfaceState, SyncCore};
use roomdesk_core::EntityId;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn wait_for<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn settings_for(server: &MockServer) -> RoomdeskSettings {
    let mut settings = RoomdeskSettings::default();
    settings.auth.renewal_url = format!("{}/api/auth/refresh", server.uri());
    settings.sync.snapshot_url = Some(format!("{}/api/rooms", server.uri()));
    settings
}

async fn mount_rooms(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/rooms"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "items": [{"id": "room1", "name": "Lobby", "status": "active", "player_count": 3, "max_players": 6}]
        })))
        .mount(server)
        .await;
}

fn core_for(server: &MockServer) -> (SyncCore, testing::FakeController) {
    let (connector, controller) = testing::fake();
    controller.respond_with("session:init", json!({"success": true}));
    controller.respond_with("rooms:list", json!({"success": true, "items": []}));
    let core = SyncCore::builder(settings_for(server))
        .connector(Arc::new(connector))
        .build();
    (core, controller)
}

fn far_expiry() -> i64 {
    chrono::Utc::now().timestamp_millis() + 3_600_000
}

#[tokio::test]
async fn rest_poll_populates_reconciler() {
    let server = MockServer::start().await;
    mount_rooms(&server).await;
    let (core, _controller) = core_for(&server);

    core.login(Credential::new("tok", far_expiry())).await.unwrap();
    let reconciler = core.reconciler().clone();
    wait_for("room1", || reconciler.get_snapshot(&EntityId::from("room1")).is_some()).await;

    let room = reconciler.get_snapshot(&EntityId::from("room1")).unwrap();
    assert_eq!(room.config_fields["name"], json!("Lobby"));
    assert_eq!(room.derived["occupancy_pct"], json!(50.0));
    assert_eq!(core.surface(), SurfaceState::Live);

    core.logout().await;
}

#[tokio::test]
async fn single_room_poll_uses_query() {
    let server = MockServer::start().await;
    mount_rooms(&server).await;
    Mock::given(method("GET"))
        .and(path("/api/rooms"))
        .and(query_param("entityId", "room2"))
        .respond_with(ResponseTemplate::new(503))
        .with_priority(1)
        .mount(&server)
        .await;
    let (core, _controller) = core_for(&server);
    core.login(Credential::new("tok", far_expiry())).await.unwrap();

    let failures = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let seen = Arc::clone(&failures);
    let _sub = core.reconciler().subscribe(&EntityId::from("room2"), move |update| {
        if let EntityUpdate::PollFailed { error, .. } = update {
            seen.lock().push(error.clone());
        }
    });

    let err = core
        .reconciler()
        .poll(roomdesk::sync::PollScope::Entity(EntityId::from("room2")))
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(failures.lock().len(), 1);

    core.logout().await;
}

#[tokio::test]
async fn refresh_goes_through_renewal_endpoint() {
    let server = MockServer::start().await;
    mount_rooms(&server).await;
    Mock::given(method("POST"))
        .and(path("/api/auth/refresh"))
        .and(header("authorization", "Bearer tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "accessToken": "tok2",
            "expiresIn": 7200
        })))
        .expect(1)
        .mount(&server)
        .await;
    let (core, _controller) = core_for(&server);
    let before = far_expiry();
    core.login(Credential::new("tok", before)).await.unwrap();

    let change = core.tokens().refresh().await.unwrap();
    assert_eq!(change.status, SessionStatus::Active);
    assert!(change.refreshed);
    assert!(core.tokens().expires_at().unwrap() > before);
    assert_eq!(core.tokens().access_token().as_deref(), Some("tok2"));

    core.logout().await;
    assert_eq!(core.surface(), SurfaceState::SignedOut);
}

//! WebSocket connector against a real local server.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::{SinkExt, StreamExt};
use roomdesk_core::SyncError;
use roomdesk_core::credential::StaticCredential;
use roomdesk_realtime::{ClientConfig, ConnectionState, Connector, RealtimeClient, WebSocketConnector};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

#[tokio::test]
async fn connector_sends_bearer_and_exchanges_frames() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (auth_tx, auth_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut auth_tx = Some(auth_tx);
        let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
            let header = req
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            if let Some(tx) = auth_tx.take() {
                let _ = tx.send(header);
            }
            Ok(resp)
        })
        .await
        .unwrap();
        let (mut ws_tx, mut ws_rx) = ws.split();

        let Some(Ok(Message::Text(text))) = ws_rx.next().await else {
            panic!("expected a text frame");
        };
        let request: Value = serde_json::from_str(text.as_str()).unwrap();
        let reply = json!({"id": request["id"], "result": {"echo": request["payload"]}});
        ws_tx
            .send(Message::Text(reply.to_string().into()))
            .await
            .unwrap();
    });

    let connector = WebSocketConnector::new(format!("ws://{addr}"));
    let mut transport = connector.connect("tok-abc").await.unwrap();
    assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer tok-abc"));

    transport
        .send(json!({"id": 7, "name": "echo", "payload": {"n": 1}}).to_string())
        .await
        .unwrap();
    let reply = transport.recv().await.unwrap().unwrap();
    let reply: Value = serde_json::from_str(&reply).unwrap();
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["echo"]["n"], 1);

    transport.close().await;
    server.await.unwrap();
}

#[tokio::test]
async fn upgrade_rejected_with_401_is_auth_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = tokio_tungstenite::accept_hdr_async(stream, |_: &Request, _: Response| {
            let rejection: ErrorResponse = tokio_tungstenite::tungstenite::http::Response::builder()
                .status(StatusCode::UNAUTHORIZED)
                .body(None)
                .unwrap();
            Err(rejection)
        })
        .await;
    });

    let connector = WebSocketConnector::new(format!("ws://{addr}"));
    let err = connector.connect("expired").await.err().unwrap();
    assert_matches!(err, SyncError::Auth(_));
    server.await.unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WebSocketConnector::new(format!("ws://{addr}"));
    let err = connector.connect("tok").await.err().unwrap();
    assert_matches!(err, SyncError::Transport(_));
}

#[tokio::test]
async fn client_runs_handshake_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (names_tx, names_rx) = oneshot::channel();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut names = Vec::new();
        while let Some(Ok(msg)) = ws_rx.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(text.as_str()).unwrap();
            let Some(name) = frame["name"].as_str() else { continue };
            names.push(name.to_string());
            let result = match name {
                "session:init" => json!({"success": true}),
                "rooms:list" => json!({"success": true, "items": [{"id": "room1", "status": "active"}]}),
                _ => json!({}),
            };
            let reply = json!({"id": frame["id"], "result": result});
            ws_tx
                .send(Message::Text(reply.to_string().into()))
                .await
                .unwrap();
            if name == "rooms:list" {
                break;
            }
        }
        let _ = names_tx.send(names);
    });

    let settings = roomdesk_settings::RealtimeSettings {
        url: format!("ws://{addr}"),
        ..Default::default()
    };
    let client = RealtimeClient::new(
        ClientConfig::from_settings(&settings),
        Arc::new(WebSocketConnector::new(settings.url.clone())),
        Arc::new(StaticCredential("tok".into())),
    );
    let (snap_tx, snap_rx) = oneshot::channel();
    let snap_tx = parking_lot::Mutex::new(Some(snap_tx));
    let _sub = client.on_snapshot(move |items| {
        if let Some(tx) = snap_tx.lock().take() {
            let _ = tx.send(items.clone());
        }
    });

    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    let items = tokio::time::timeout(Duration::from_secs(5), snap_rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], "room1");
    assert_eq!(names_rx.await.unwrap(), vec!["session:init", "rooms:list"]);

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
    server.await.unwrap();
}

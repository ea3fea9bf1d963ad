//! End-to-end session tests against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use editor_companion::{AppState, Config, routes};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(root: &Path) -> SocketAddr {
    let state = AppState::new(root, Config::default(), "127.0.0.1").unwrap();
    state.ensure_directories().await.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, routes::app(state)).await.ok();
    });
    addr
}

async fn connect(addr: SocketAddr) -> (Client, String) {
    let (mut client, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let hello = recv(&mut client).await;
    assert_eq!(hello["event"], "connected");
    let session_id = hello["data"]["sessionId"].as_str().unwrap().to_string();
    (client, session_id)
}

async fn send(client: &mut Client, event: Value) {
    client
        .send(Message::Text(event.to_string().into()))
        .await
        .unwrap();
}

/// Next non-keepalive event.
async fn recv(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = msg {
            let event: Value = serde_json::from_str(text.as_str()).unwrap();
            if event["event"] != "ping" {
                return event;
            }
        }
    }
}

async fn assert_no_more_events(client: &mut Client) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(event["event"], "ping", "unexpected event {event}");
            }
            Ok(Some(Ok(_))) => {}
            Ok(other) => panic!("connection ended unexpectedly: {other:?}"),
        }
    }
}

async fn wait_for(path: &Path) {
    for _ in 0..100 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("{} never appeared", path.display());
}

#[tokio::test]
async fn test_make_then_list_directory() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;
    let (mut client, _) = connect(addr).await;

    send(
        &mut client,
        json!({"event": "makeDirectory", "data": "Home/project/src"}),
    )
    .await;
    wait_for(&dir.path().join("Home/project/src")).await;

    send(&mut client, json!({"event": "getDirectory", "data": "Home/project"})).await;
    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], "getDirectory");
    assert_eq!(reply["data"]["path"], "Home/project");
    assert_eq!(
        reply["data"]["entries"],
        json!([{"name": "src", "isDirectory": true}])
    );
}

#[tokio::test]
async fn test_replies_go_only_to_requesting_session() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("Home/alpha/one")).unwrap();
    std::fs::create_dir_all(dir.path().join("Home/beta/two")).unwrap();
    let addr = start_server(dir.path()).await;

    let (mut first, first_id) = connect(addr).await;
    let (mut second, second_id) = connect(addr).await;
    assert_ne!(first_id, second_id);

    send(&mut first, json!({"event": "getDirectory", "data": "Home/alpha"})).await;
    send(&mut second, json!({"event": "getDirectory", "data": "Home/beta"})).await;

    let a = recv(&mut first).await;
    let b = recv(&mut second).await;
    assert_eq!(a["data"]["path"], "Home/alpha");
    assert_eq!(a["data"]["entries"][0]["name"], "one");
    assert_eq!(b["data"]["path"], "Home/beta");
    assert_eq!(b["data"]["entries"][0]["name"], "two");

    // Nothing else is queued for either client.
    send(&mut first, json!({"event": "getIP"})).await;
    send(&mut second, json!({"event": "getIP"})).await;
    assert_eq!(recv(&mut first).await["event"], "getIP");
    assert_eq!(recv(&mut second).await["event"], "getIP");
}

#[tokio::test]
async fn test_disallowed_exec_gets_no_reply() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;
    let (mut client, _) = connect(addr).await;

    send(
        &mut client,
        json!({"event": "exec", "data": {"cmd": "rm", "value": "-rf /"}}),
    )
    .await;
    send(&mut client, json!({"event": "getIP"})).await;

    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], "getIP");
    assert_eq!(reply["data"], "127.0.0.1");

    // Nothing from the exec request may trail in afterwards either.
    assert_no_more_events(&mut client).await;
}

#[tokio::test]
async fn test_escape_attempt_is_reported() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;
    let (mut client, _) = connect(addr).await;

    send(
        &mut client,
        json!({"event": "makeDirectory", "data": "../../outside"}),
    )
    .await;

    let reply = recv(&mut client).await;
    assert_eq!(reply["event"], "error");
    assert_eq!(reply["data"]["request"], "makeDirectory");
    assert_eq!(reply["data"]["code"], "PATH_ESCAPE");
}

#[tokio::test]
async fn test_malformed_frame_keeps_session_open() {
    let dir = TempDir::new().unwrap();
    let addr = start_server(dir.path()).await;
    let (mut client, _) = connect(addr).await;

    client
        .send(Message::Text("not json".to_string().into()))
        .await
        .unwrap();
    send(&mut client, json!({"event": "noSuchEvent", "data": 1})).await;
    send(&mut client, json!({"event": "getIP"})).await;

    assert_eq!(recv(&mut client).await["event"], "getIP");
}

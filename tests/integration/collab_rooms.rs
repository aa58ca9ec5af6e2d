//! Integration tests for URL-addressed collaboration rooms.
//!
//! Verifies:
//! 1. Rooms created over HTTP return a connectable `ws://` URL.
//! 2. Joining greets the member with a fresh id.
//! 3. Frames are copied verbatim to the other members only.
//! 4. Unknown rooms reject the upgrade.
//! 5. Closing a room disconnects its members and forgets it.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mdrelay::collab::{self, CreatedRoom};
use serde_json::Value;
use reqwest::StatusCode;
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn recv_text(ws: &mut Client) -> String {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    msg.to_text().unwrap().to_string()
}

/// Joins a room by URL and returns the client with its assigned member id.
async fn join(url: &str, room_id: &str) -> (Client, String) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let greeting: Value = serde_json::from_str(&recv_text(&mut ws).await).unwrap();
    assert_eq!(greeting["success"], format!("Joined room {room_id}"));
    let member = greeting["userId"].as_str().unwrap().to_string();
    (ws, member)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_over_http_and_relay_between_members() {
    let (addr, _service, _handle) = collab::start_server("127.0.0.1:0", "127.0.0.1")
        .await
        .unwrap();

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/rooms"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: CreatedRoom = response.json().await.unwrap();
    assert_eq!(
        created.url,
        format!("ws://127.0.0.1:{}/room/{}", addr.port(), created.room_id)
    );

    let (mut alice, alice_id) = join(&created.url, &created.room_id).await;
    let (mut bob, bob_id) = join(&created.url, &created.room_id).await;
    assert_ne!(alice_id, bob_id);

    alice
        .send(Message::Text("raw update, not JSON".into()))
        .await
        .unwrap();
    assert_eq!(recv_text(&mut bob).await, "raw update, not JSON");

    let silent = tokio::time::timeout(Duration::from_millis(200), alice.next()).await;
    assert!(silent.is_err(), "sender must not receive its own frame");
}

#[tokio::test]
async fn binary_frames_are_relayed_as_text() {
    let (_addr, service, _handle) = collab::start_server("127.0.0.1:0", "127.0.0.1")
        .await
        .unwrap();
    let created = service.create_room().await;
    let (mut alice, _) = join(&created.url, &created.room_id).await;
    let (mut bob, _) = join(&created.url, &created.room_id).await;

    alice
        .send(Message::Binary(b"yjs update".to_vec().into()))
        .await
        .unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), bob.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(next, Message::Text(ref t) if t.as_str() == "yjs update"));
}

#[tokio::test]
async fn unknown_room_is_rejected() {
    let (addr, _service, _handle) = collab::start_server("127.0.0.1:0", "127.0.0.1")
        .await
        .unwrap();
    let result = tokio_tungstenite::connect_async(format!("ws://{addr}/room/missing")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn closing_a_room_disconnects_members() {
    let (addr, service, _handle) = collab::start_server("127.0.0.1:0", "127.0.0.1")
        .await
        .unwrap();
    let created = service.create_room().await;
    let (mut member, _) = join(&created.url, &created.room_id).await;

    let http = reqwest::Client::new();
    let close_url = format!("http://{addr}/rooms/{}", created.room_id);
    let status = http.delete(&close_url).send().await.unwrap().status();
    assert_eq!(status, StatusCode::NO_CONTENT);

    let next = tokio::time::timeout(Duration::from_secs(5), member.next())
        .await
        .unwrap();
    assert!(matches!(next, Some(Ok(Message::Close(_))) | None));
    assert!(!service.room_exists(&created.room_id).await);

    let status = http.delete(&close_url).send().await.unwrap().status();
    assert_eq!(status, StatusCode::NOT_FOUND);

    let rejoin = tokio_tungstenite::connect_async(created.url.as_str()).await;
    assert!(rejoin.is_err());
}

#[tokio::test]
async fn member_leaving_keeps_room_open() {
    let (_addr, service, _handle) = collab::start_server("127.0.0.1:0", "127.0.0.1")
        .await
        .unwrap();
    let created = service.create_room().await;
    let (mut member, _) = join(&created.url, &created.room_id).await;
    assert_eq!(service.member_count(&created.room_id).await, Some(1));

    member.close(None).await.unwrap();
    for _ in 0..50 {
        if service.member_count(&created.room_id).await == Some(0) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(service.member_count(&created.room_id).await, Some(0));
    assert!(service.room_exists(&created.room_id).await);
}

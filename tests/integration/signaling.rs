//! Integration tests for point-to-point `rtc:*` signaling forwarding.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mdrelay::relay;
use mdrelay_proto::RoomId;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn start() -> SocketAddr {
    let (addr, _handle) = relay::start_server("127.0.0.1:0", RoomId::default_room())
        .await
        .unwrap();
    addr
}

async fn send(ws: &mut Client, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .unwrap();
    serde_json::from_str(msg.to_text().unwrap()).unwrap()
}

async fn assert_silent(ws: &mut Client) {
    let res = tokio::time::timeout(Duration::from_millis(200), ws.next()).await;
    assert!(res.is_err(), "expected no frame, got {res:?}");
}

/// Connect, announce, and drain everything up to the `presence:list` reply.
async fn join(addr: SocketAddr, user: i64, room: &str) -> Client {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    assert_eq!(recv(&mut ws).await["type"], "ready");
    send(&mut ws, json!({"type":"presence","userId":user,"roomId":room})).await;
    assert_eq!(recv(&mut ws).await["type"], "presence:list");
    ws
}

#[tokio::test]
async fn offer_is_forwarded_verbatim_with_room() {
    let addr = start().await;
    let mut c1 = join(addr, 1, "default").await;
    let mut c2 = join(addr, 2, "default").await;
    let mut c3 = join(addr, 3, "default").await;
    // Drain presence:join broadcasts.
    recv(&mut c1).await;
    recv(&mut c1).await;
    recv(&mut c2).await;

    send(&mut c1, json!({"type":"rtc:offer","to":2,"sdp":"X"})).await;

    assert_eq!(
        recv(&mut c2).await,
        json!({"type":"rtc:offer","to":2,"sdp":"X","roomId":"default"})
    );
    assert_silent(&mut c1).await;
    assert_silent(&mut c3).await;
}

#[tokio::test]
async fn answer_and_candidate_round_trip_between_peers() {
    let addr = start().await;
    let mut caller = join(addr, 10, "call").await;
    let mut callee = join(addr, 20, "call").await;
    recv(&mut caller).await; // presence:join for 20

    send(&mut caller, json!({"type":"rtc:offer","to":20,"from":10,"sdp":"offer-sdp"})).await;
    let offer = recv(&mut callee).await;
    assert_eq!(offer["from"], 10);

    send(&mut callee, json!({"type":"rtc:answer","to":10,"from":20,"sdp":"answer-sdp"})).await;
    assert_eq!(
        recv(&mut caller).await,
        json!({"type":"rtc:answer","to":10,"from":20,"sdp":"answer-sdp","roomId":"call"})
    );

    let candidate = json!({"candidate":"candidate:1 1 UDP 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0});
    send(&mut callee, json!({"type":"rtc:candidate","to":10,"candidate":candidate})).await;
    let received = recv(&mut caller).await;
    assert_eq!(received["type"], "rtc:candidate");
    assert_eq!(received["candidate"], candidate);
    assert_eq!(received["roomId"], "call");
}

#[tokio::test]
async fn explicit_room_overrides_bound_room_in_forward() {
    let addr = start().await;
    let mut c1 = join(addr, 1, "a").await;
    let mut c2 = join(addr, 2, "b").await;

    // Target lives in room "b"; the room-scoped lookup hits there.
    send(&mut c1, json!({"type":"rtc:offer","to":2,"sdp":"S","roomId":"b"})).await;
    assert_eq!(recv(&mut c2).await["roomId"], "b");

    // Without a room the sender's bound room is used and the global index
    // still finds the target.
    send(&mut c1, json!({"type":"rtc:offer","to":2,"sdp":"S"})).await;
    assert_eq!(recv(&mut c2).await["roomId"], "a");
    assert_silent(&mut c1).await;
}

#[tokio::test]
async fn signal_to_absent_user_is_silently_dropped() {
    let addr = start().await;
    let mut c1 = join(addr, 1, "default").await;

    send(&mut c1, json!({"type":"rtc:offer","to":404,"sdp":"X"})).await;
    assert_silent(&mut c1).await;

    // Connection still works.
    send(&mut c1, json!({"type":"message","text":"still here"})).await;
    assert_eq!(recv(&mut c1).await["text"], "still here");
}

#[tokio::test]
async fn signal_to_departed_user_is_dropped() {
    let addr = start().await;
    let mut c1 = join(addr, 1, "default").await;
    let mut c2 = join(addr, 2, "default").await;
    recv(&mut c1).await; // presence:join

    c2.close(None).await.unwrap();
    assert_eq!(recv(&mut c1).await["type"], "presence:leave");

    send(&mut c1, json!({"type":"rtc:offer","to":2,"sdp":"X"})).await;
    assert_silent(&mut c1).await;
}

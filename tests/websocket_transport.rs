use consult_call_lib::signaling::{SignalingClient, WebSocketTransport, DISCONNECT_EVENT};
use consult_call_lib::Role;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

/// Accepts one WebSocket client, reports the request query and the first
/// frame it sends, answers with a `user-joined` frame and then hangs up.
async fn one_shot_server() -> (String, oneshot::Receiver<(Option<String>, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let query = Arc::new(Mutex::new(None));
        let seen = query.clone();
        let mut ws = tokio_tungstenite::accept_hdr_async(socket, move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            *seen.lock().unwrap() = req.uri().query().map(str::to_owned);
            Ok(resp)
        })
        .await
        .unwrap();

        let first = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break serde_json::from_str::<Value>(&text).unwrap(),
                _ => continue,
            }
        };

        let joined = json!({
            "event": "user-joined",
            "data": {"socketId": "c-2", "userId": "u-2", "userName": "Bea", "userRole": "helper"}
        });
        ws.send(Message::Text(joined.to_string())).await.unwrap();
        ws.close(None).await.unwrap();

        let query = query.lock().unwrap().clone();
        let _ = done_tx.send((query, first));
    });

    (format!("ws://{addr}/ws"), done_rx)
}

#[tokio::test]
async fn websocket_round_trip_and_drop() {
    let (endpoint, done) = one_shot_server().await;
    let client = SignalingClient::new(Arc::new(WebSocketTransport));

    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Value)>();
    let joined_tx = tx.clone();
    let _joined = client.on("user-joined", move |data| {
        let _ = joined_tx.send(("user-joined".into(), data.clone()));
    });
    let _dropped = client.on(DISCONNECT_EVENT, move |_| {
        let _ = tx.send((DISCONNECT_EVENT.into(), Value::Null));
    });

    client.connect(&endpoint, Some("s3cret")).await;
    assert!(client.is_connected());
    assert!(client.join_session("s-1", "u-1", "Ann", Role::Requester));

    let (query, first) = timeout(Duration::from_secs(5), done).await.unwrap().unwrap();
    assert_eq!(query.as_deref(), Some("token=s3cret"));
    assert_eq!(first["event"], "join-session");
    assert_eq!(first["data"]["sessionId"], "s-1");
    assert_eq!(first["data"]["userRole"], "requester");

    let (event, data) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, "user-joined");
    assert_eq!(data["userName"], "Bea");

    let (event, _) = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event, DISCONNECT_EVENT);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn unreachable_server_leaves_client_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = SignalingClient::new(Arc::new(WebSocketTransport));
    client.connect(&format!("ws://{addr}/ws"), None).await;
    assert!(!client.is_connected());
    assert!(!client.emit("ping", json!({})));
}

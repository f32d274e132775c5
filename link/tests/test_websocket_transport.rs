//! End-to-end over a real websocket: a local `tokio-tungstenite` server
//! plays the middleware.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::WebSocketStream;
use truenas_link::{
    DdpClient, DisconnectKind, DisconnectReason, EventHandlers, LinkError, LinkTimeouts,
};

mod common;

type ServerSocket = WebSocketStream<TcpStream>;

fn timeouts() -> LinkTimeouts {
    LinkTimeouts::builder()
        .connection_timeout(Duration::from_secs(5))
        .handshake_timeout(Duration::from_secs(5))
        .keepalive_interval(Duration::ZERO)
        .build()
}

async fn next_json(ws: &mut ServerSocket) -> Option<Value> {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for the client")?
            .ok()?;
        match frame {
            WsMessage::Text(text) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            WsMessage::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn send_json(ws: &mut ServerSocket, value: Value) {
    ws.send(WsMessage::text(value.to_string())).await.unwrap();
}

/// Accept one websocket, recording the request path.
async fn accept(listener: &TcpListener, path: Arc<Mutex<String>>) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    tokio_tungstenite::accept_hdr_async(stream, move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        *path.lock().unwrap() = request.uri().path().to_string();
        Ok(response)
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_session_over_websocket() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let path = Arc::new(Mutex::new(String::new()));

    let server_path = path.clone();
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, server_path).await;

        // Legacy banner without `msg` is skipped by the client.
        send_json(&mut ws, json!({ "server_id": "0" })).await;

        let connect = next_json(&mut ws).await.expect("connect");
        assert_eq!(connect, json!({ "msg": "connect", "version": "1", "support": ["1"] }));
        send_json(&mut ws, json!({ "msg": "connected", "session": "ws-session" })).await;

        let call = next_json(&mut ws).await.expect("method");
        assert_eq!(call["msg"], "method");
        assert_eq!(call["method"], "system.info");
        assert_eq!(call["params"], json!([]));
        let id = call["id"].as_str().unwrap().to_string();

        // Results may also arrive as binary frames holding UTF-8 JSON.
        let result = json!({ "msg": "result", "id": id, "result": { "hostname": "nas" } });
        ws.send(WsMessage::binary(result.to_string().into_bytes()))
            .await
            .unwrap();

        // The client closes the socket on disconnect.
        assert!(next_json(&mut ws).await.is_none());
    });

    let sent = Arc::new(AtomicUsize::new(0));
    let received = Arc::new(AtomicUsize::new(0));
    let sent_clone = sent.clone();
    let received_clone = received.clone();
    let client = DdpClient::builder()
        .base_url(format!("http://{}/ui/dashboard#top", addr))
        .timeouts(timeouts())
        .event_handlers(
            EventHandlers::new()
                .on_send(move |_| {
                    sent_clone.fetch_add(1, Ordering::SeqCst);
                })
                .on_receive(move |_| {
                    received_clone.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .build()
        .unwrap();

    assert_eq!(client.connect(None).await.unwrap(), "ws-session");
    assert_eq!(path.lock().unwrap().as_str(), "/websocket");

    let info: Value = client.call_method("system.info", vec![]).await.unwrap();
    assert_eq!(info, json!({ "hostname": "nas" }));

    client.disconnect().await.unwrap();
    timeout(Duration::from_secs(5), server)
        .await
        .expect("server should finish")
        .unwrap();

    assert_eq!(sent.load(Ordering::SeqCst), 2, "connect + method");
    assert_eq!(received.load(Ordering::SeqCst), 3, "banner + connected + result");
}

#[tokio::test]
async fn test_unknown_message_kind_does_not_end_session() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let errors_clone = errors.clone();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, Arc::default()).await;
        next_json(&mut ws).await.expect("connect");
        send_json(&mut ws, json!({ "msg": "connected", "session": "s" })).await;

        let call = next_json(&mut ws).await.expect("method");
        send_json(&mut ws, json!({ "msg": "bogus" })).await;
        ws.send(WsMessage::text("not json")).await.unwrap();
        send_json(&mut ws, json!({ "msg": "result", "id": call["id"], "result": 1 })).await;

        assert!(next_json(&mut ws).await.is_none());
    });

    let client = DdpClient::builder()
        .base_url(format!("ws://{}", addr))
        .timeouts(timeouts())
        .event_handlers(EventHandlers::new().on_error(move |error| {
            assert!(error.recoverable);
            errors_clone.fetch_add(1, Ordering::SeqCst);
        }))
        .build()
        .unwrap();

    client.connect(None).await.unwrap();
    assert_eq!(client.call_method_raw("core.ping", vec![]).await.unwrap(), json!(1));
    assert_eq!(errors.load(Ordering::SeqCst), 2);

    client.disconnect().await.unwrap();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_irregular_result_frames_never_leave_a_call_waiting() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, Arc::default()).await;
        next_json(&mut ws).await.expect("connect");
        send_json(&mut ws, json!({ "msg": "connected", "session": "s" })).await;

        let replies = [
            // Bare error value instead of an object.
            json!("denied"),
            json!({ "error": 13, "errorType": null, "reason": "EACCES" }),
            // Undecodable: reason must be a string.
            json!({ "error": 13, "reason": ["EACCES"] }),
        ];
        for error in replies {
            let call = next_json(&mut ws).await.expect("method");
            send_json(&mut ws, json!({ "msg": "result", "id": call["id"], "error": error })).await;
        }

        assert!(next_json(&mut ws).await.is_none());
    });

    let client = DdpClient::builder()
        .base_url(format!("ws://{}", addr))
        .timeouts(timeouts())
        .build()
        .unwrap();
    client.connect(None).await.unwrap();

    let outcome = |name: &'static str| {
        let client = &client;
        async move {
            timeout(Duration::from_secs(5), client.call_method_raw(name, vec![]))
                .await
                .expect("the call must complete")
        }
    };

    match outcome("filesystem.stat").await {
        Err(LinkError::MethodCall(error)) => {
            assert_eq!(error.error, json!("denied"));
            assert_eq!(error.error_type, "");
        },
        other => panic!("expected MethodCall, got {:?}", other),
    }
    match outcome("filesystem.listdir").await {
        Err(LinkError::MethodCall(error)) => {
            assert_eq!(error.error, json!(13));
            assert_eq!(error.reason.as_deref(), Some("EACCES"));
        },
        other => panic!("expected MethodCall, got {:?}", other),
    }
    match outcome("filesystem.chown").await {
        Err(LinkError::ProtocolError(reason)) => assert!(reason.contains("'result'"), "{}", reason),
        other => panic!("expected ProtocolError, got {:?}", other),
    }
    assert!(client.is_connected(), "a bad result frame does not end the session");

    client.disconnect().await.unwrap();
    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_server_close_code_reaches_disconnect_reason() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let mut ws = accept(&listener, Arc::default()).await;
        next_json(&mut ws).await.expect("connect");
        send_json(&mut ws, json!({ "msg": "connected", "session": "going-away" })).await;

        // Leave the call unanswered and close with 1001.
        next_json(&mut ws).await.expect("method");
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "middleware restarting".into(),
        }))
        .await
        .unwrap();
    });

    let (reason_tx, reason_rx) = std::sync::mpsc::channel::<DisconnectReason>();
    let reason_tx = Mutex::new(reason_tx);
    let client = DdpClient::builder()
        .base_url(format!("ws://{}", addr))
        .timeouts(timeouts())
        .event_handlers(EventHandlers::new().on_disconnect(move |reason| {
            let _ = reason_tx.lock().unwrap().send(reason);
        }))
        .build()
        .unwrap();
    client.connect(None).await.unwrap();

    let call = timeout(Duration::from_secs(5), client.call_method_raw("system.reboot", vec![]))
        .await
        .expect("the call must fail once the server closes");
    assert!(matches!(call, Err(LinkError::ConnectionLost(_))), "got {:?}", call);

    let reason = reason_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("on_disconnect fires");
    assert_eq!(reason.session_id, "going-away");
    assert_eq!(reason.kind, DisconnectKind::ServerClosed);
    assert_eq!(reason.close_code, Some(1001));
    assert!(!client.is_connected());

    timeout(Duration::from_secs(5), server).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_unauthorized_upgrade_is_an_authentication_error() {
    common::init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let _ = tokio_tungstenite::accept_hdr_async(stream, |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            let mut rejection = ErrorResponse::new(None);
            *rejection.status_mut() = StatusCode::UNAUTHORIZED;
            Err(rejection)
        })
        .await;
    });

    let client = DdpClient::builder()
        .base_url(format!("http://{}", addr))
        .timeouts(timeouts())
        .build()
        .unwrap();

    let err = client.connect(None).await.unwrap_err();
    assert!(matches!(err, LinkError::AuthenticationError(_)), "got {:?}", err);
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_refused_connection_is_a_websocket_error() {
    common::init_logging();
    // Bind and drop to get a port nobody listens on.
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let client = DdpClient::builder()
        .base_url(format!("http://{}", addr))
        .timeouts(timeouts())
        .build()
        .unwrap();

    assert!(matches!(client.connect(None).await, Err(LinkError::WebSocketError(_))));
}

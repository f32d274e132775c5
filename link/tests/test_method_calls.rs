//! Method call correlation: id matching, server errors, timeouts and
//! connection loss while calls are pending.

use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use truenas_link::{DdpClient, LinkError, LinkTimeouts, Message};

mod common;
use common::{connect, connected_client, init_logging, method_error, mock_client};

#[tokio::test]
async fn test_results_are_correlated_by_id() {
    let (client, _listener, mut server) = connected_client().await;

    let (first, second, ()) = tokio::join!(
        client.call_method_raw("pool.query", vec![json!([["name", "=", "tank"]])]),
        client.call_method_raw("system.info", vec![]),
        async {
            let (id_a, method_a, _) = server.expect_method().await;
            let (id_b, method_b, _) = server.expect_method().await;
            assert_ne!(id_a, id_b, "concurrent calls must use distinct ids");

            // Answer in reverse order of arrival.
            for (id, method) in [(id_b, method_b), (id_a, method_a)] {
                server.reply(&id, json!({ "answered": method }));
            }
        }
    );

    assert_eq!(first.unwrap(), json!({ "answered": "pool.query" }));
    assert_eq!(second.unwrap(), json!({ "answered": "system.info" }));
}

#[tokio::test]
async fn test_many_concurrent_calls_get_unique_ids() {
    let (client, _listener, mut server) = connected_client().await;
    let client = &client;

    let calls = futures_util::future::join_all(
        (0..20).map(|n| async move { client.call_method_raw("core.ping", vec![json!(n)]).await }),
    );
    let answers = async {
        let mut ids = HashSet::new();
        let mut received = Vec::new();
        for _ in 0..20 {
            let (id, _, params) = server.expect_method().await;
            assert!(ids.insert(id.clone()), "duplicate call id {}", id);
            received.push((id, params[0].clone()));
        }
        for (id, n) in received.into_iter().rev() {
            server.reply(&id, n);
        }
    };

    let (results, ()) = tokio::join!(calls, answers);
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), json!(n));
    }
}

#[tokio::test]
async fn test_method_error_is_surfaced_verbatim() {
    let (client, _listener, mut server) = connected_client().await;
    let error = method_error(2, "[ENOENT] Pool not found");

    let (result, ()) = tokio::join!(client.call_method_raw("pool.get_instance", vec![json!(7)]), async {
        let (id, _, _) = server.expect_method().await;
        // The result field must be ignored when an error is present.
        server.send(Message::Result {
            id,
            error: Some(error.clone()),
            result: Some(json!("should not be returned")),
        });
    });

    match result {
        Err(LinkError::MethodCall(received)) => assert_eq!(received, error),
        other => panic!("expected MethodCall error, got {:?}", other),
    }
    assert!(client.is_connected(), "a method error does not end the session");
}

#[tokio::test]
async fn test_typed_results() {
    #[derive(Debug, Deserialize, PartialEq)]
    struct Pool {
        id: u64,
        name: String,
    }

    let (client, _listener, mut server) = connected_client().await;

    let (pools, ()) = tokio::join!(client.call_method::<Vec<Pool>>("pool.query", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.reply(&id, json!([{ "id": 1, "name": "tank", "status": "ONLINE" }]));
    });
    assert_eq!(
        pools.unwrap(),
        vec![Pool {
            id: 1,
            name: "tank".to_string()
        }]
    );

    // An absent result deserializes from null.
    let (unit, ()) = tokio::join!(client.call_method::<()>("service.restart", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.send(Message::Result {
            id,
            error: None,
            result: None,
        });
    });
    unit.unwrap();

    // A result of the wrong shape is a serialization error.
    let (wrong, ()) = tokio::join!(client.call_method::<u32>("system.hostname", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.reply(&id, json!("truenas"));
    });
    assert!(matches!(wrong, Err(LinkError::SerializationError(_))));
}

#[tokio::test]
async fn test_pending_calls_fail_when_connection_drops() {
    let (client, _listener, mut server) = connected_client().await;

    let (first, second, ()) = tokio::join!(
        client.call_method_raw("disk.query", vec![]),
        client.call_method_raw("pool.query", vec![]),
        async {
            server.expect_method().await;
            server.expect_method().await;
            server.hang_up();
        }
    );

    assert!(first.unwrap_err().is_connection_lost());
    assert!(second.unwrap_err().is_connection_lost());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_pending_calls_fail_on_disconnect() {
    let (client, _listener, mut server) = connected_client().await;

    let (result, disconnected) = tokio::join!(client.call_method_raw("disk.query", vec![]), async {
        server.expect_method().await;
        client.disconnect().await
    });

    disconnected.unwrap();
    assert!(result.unwrap_err().is_connection_lost());
}

#[tokio::test]
async fn test_call_timeout() {
    init_logging();
    let timeouts = LinkTimeouts::builder()
        .call_timeout(Duration::from_millis(50))
        .keepalive_interval(Duration::ZERO)
        .build();
    let (client, mut listener) = mock_client(timeouts);
    let mut server = connect(&client, &mut listener, "timeouts").await;

    let result = client.call_method_raw("catalog.sync", vec![]).await;
    assert!(matches!(result, Err(LinkError::TimeoutError(_))));
    let (late_id, _, _) = server.expect_method().await;

    // A late result for the abandoned call is ignored.
    server.reply(&late_id, json!("late"));

    let (next, ()) = tokio::join!(client.call_method_raw("system.ready", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.reply(&id, json!(true));
    });
    assert_eq!(next.unwrap(), json!(true));
}

#[tokio::test]
async fn test_dropped_call_does_not_disturb_others() {
    let (client, _listener, mut server) = connected_client().await;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        client.call_method_raw("filesystem.stat", vec![json!("/mnt")]),
    )
    .await;
    assert!(abandoned.is_err());
    let (abandoned_id, _, _) = server.expect_method().await;

    let (result, ()) = tokio::join!(client.call_method_raw("system.info", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.reply(&abandoned_id, json!("stale"));
        server.reply(&id, json!("fresh"));
    });
    assert_eq!(result.unwrap(), json!("fresh"));
}

#[tokio::test]
async fn test_server_ping_is_answered() {
    let (client, _listener, mut server) = connected_client().await;

    server.send(Message::Ping {
        id: Some("p-1".to_string()),
    });
    assert_eq!(
        server.recv().await,
        Message::Pong {
            id: Some("p-1".to_string())
        }
    );

    server.send(Message::Ping { id: None });
    assert_eq!(server.recv().await, Message::Pong { id: None });
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_bad_frames_and_server_errors_keep_the_session() {
    let (client, _listener, mut server) = connected_client().await;

    server.inject(Err(LinkError::ProtocolError("Unknown message type 'bogus'".to_string())));
    server.send(Message::Error {
        reason: "Bad request".to_string(),
        offending_message: Some(json!({ "msg": "bogus" })),
    });
    server.send(Message::Updated {
        methods: vec!["x".to_string()],
    });

    let (result, ()) = tokio::join!(client.call_method_raw("system.info", vec![]), async {
        let (id, _, _) = server.expect_method().await;
        server.reply(&id, json!({}));
    });
    assert_eq!(result.unwrap(), json!({}));
}

#[tokio::test]
async fn test_fatal_transport_error_ends_the_session() {
    let (client, _listener, mut server) = connected_client().await;

    let (result, ()) = tokio::join!(client.call_method_raw("system.info", vec![]), async {
        server.expect_method().await;
        server.inject(Err(LinkError::WebSocketError("connection reset".to_string())));
    });

    assert!(result.unwrap_err().is_connection_lost());
    assert!(!client.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_keepalive_ping_and_pong_timeout() {
    init_logging();
    let timeouts = LinkTimeouts::builder()
        .keepalive_interval(Duration::from_secs(30))
        .pong_timeout(Duration::from_secs(10))
        .build();
    let (client, mut listener) = mock_client(timeouts);
    let mut server = connect(&client, &mut listener, "keepalive").await;

    // Idle: the client pings. Answering keeps the session alive.
    let ping = server.recv_within(Duration::from_secs(60)).await;
    let Some(Message::Ping { id }) = ping else {
        panic!("expected keepalive ping, got {:?}", ping);
    };
    assert!(id.is_some());
    server.send(Message::Pong { id });
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert!(client.is_connected());

    // Unanswered ping: the session is declared lost.
    let ping = server.recv_within(Duration::from_secs(60)).await;
    assert!(matches!(ping, Some(Message::Ping { .. })));
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(!client.is_connected());
    assert!(server.is_closed());
}

#[tokio::test]
async fn test_with_connector_rejects_calls_before_connect() {
    init_logging();
    let client = DdpClient::with_connector(common::MockConnector::new().0);
    assert!(matches!(
        client.call_method::<serde_json::Value>("system.info", vec![]).await,
        Err(LinkError::IllegalState(_))
    ));
}

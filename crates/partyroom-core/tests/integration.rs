//! Integration tests for partyroom-core.
//!
//! These tests drive rooms end to end through the in-process host:
//! - Edge routing and hooks
//! - Connection identity across hibernation
//! - Worker lifecycle per wake cycle
//! - Storage, alarms and cross-party calls

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use partyroom_core::{
    ABNORMAL_CLOSURE_CODE, ClassWorker, CloseFrame, HandlerError, HandlerResult, HookReturn,
    LazyConnection, ModuleWorker, PartyServer, ReadyState, Room, RoomRequest, RoomResponse,
    SWITCHING_PROTOCOLS, SocketEvent, SocketEvents, SocketHandle, WsMessage,
};
use partyroom_host::{HibernateOutcome, LocalHost};

// ============================================================================
// Helpers
// ============================================================================

async fn connect(host: &LocalHost, url: &str) -> (SocketHandle, SocketEvents) {
    let response = host.fetch(RoomRequest::websocket(url)).await;
    assert_eq!(response.status, SWITCHING_PROTOCOLS);

    let client = response.web_socket.expect("upgrade carries a socket");
    let events = client.take_events().expect("client events are untaken");
    // A client refused at connect time is already closed.
    let _ = client.accept();
    (client, events)
}

async fn next_event(events: &mut SocketEvents) -> SocketEvent {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("event arrives in time")
        .expect("event stream is open")
}

async fn next_text(events: &mut SocketEvents) -> String {
    match next_event(events).await {
        SocketEvent::Message(WsMessage::Text(text)) => text,
        other => panic!("expected a text message, got {other:?}"),
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

/// Class server that answers every message with `<connection id>:<room id>`.
struct Whoami {
    room: Arc<Room>,
}

#[async_trait]
impl PartyServer for Whoami {
    async fn on_message(&self, _message: WsMessage, connection: LazyConnection) -> HandlerResult {
        connection.send(format!("{}:{}", connection.id(), self.room.id()))?;
        Ok(())
    }
}

fn whoami_host(constructed: &Arc<AtomicUsize>) -> LocalHost {
    let constructed = constructed.clone();
    let worker = ClassWorker::new(move |room| {
        constructed.fetch_add(1, Ordering::SeqCst);
        Whoami { room }
    })
    .hibernate(true);

    LocalHost::builder().party("main", worker).build().unwrap()
}

// ============================================================================
// Test: Routing
// ============================================================================

#[tokio::test]
async fn test_short_form_and_long_form_reach_same_room() {
    let host = LocalHost::builder()
        .party(
            "main",
            ModuleWorker::new().on_request(|_request, room| async move {
                Ok(RoomResponse::text(
                    200,
                    &format!("{}|{}", room.id(), room.internal_id()),
                ))
            }),
        )
        .build()
        .unwrap();

    let short = host.fetch(RoomRequest::get("http://h/party/abc")).await;
    let long = host.fetch(RoomRequest::get("http://h/parties/main/abc")).await;
    let trailing = host
        .fetch(RoomRequest::get("http://h/parties/main/abc/extra/segments"))
        .await;

    assert_eq!(short.status, 200);
    assert_eq!(short.body_text(), long.body_text());
    assert_eq!(short.body_text(), trailing.body_text());
    assert!(short.body_text().starts_with("abc|"));
    assert_eq!(host.live_rooms().len(), 1);
}

#[tokio::test]
async fn test_unknown_party_and_missing_handler() {
    let host = LocalHost::builder()
        .party("main", ModuleWorker::new())
        .build()
        .unwrap();

    let response = host.fetch(RoomRequest::get("http://h/parties/nope/r")).await;
    assert_eq!(response.status, 404);
    assert_eq!(response.body_text(), "Party not found: nope");

    let response = host.fetch(RoomRequest::get("http://h/party/r")).await;
    assert_eq!(response.status, 500);
    assert_eq!(response.body_text(), "No onRequest handler defined for party");
}

#[tokio::test]
async fn test_request_error_code_is_honoured() {
    let host = LocalHost::builder()
        .party(
            "main",
            ModuleWorker::new().on_request(|_request, _room| async {
                Err(HandlerError::new("slow down").with_code(429))
            }),
        )
        .build()
        .unwrap();

    let response = host.fetch(RoomRequest::get("http://h/party/r")).await;
    assert_eq!(response.status, 429);
    assert_eq!(response.body_text(), "slow down");
}

// ============================================================================
// Test: Edge Hooks
// ============================================================================

#[tokio::test]
async fn test_connect_hook_rejection_never_wakes_room() {
    let starts = Arc::new(AtomicUsize::new(0));
    let counter = starts.clone();
    let worker = ModuleWorker::new()
        .on_start(move |_room| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .on_before_connect(|_request, _lobby| async {
            Ok(HookReturn::Response(RoomResponse::text(401, "no ticket")))
        });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let response = host
        .fetch(RoomRequest::websocket("http://h/party/abc?_pk=a"))
        .await;

    assert_eq!(response.status, 401);
    assert_eq!(response.body_text(), "no ticket");
    assert!(response.web_socket.is_none());
    assert_eq!(starts.load(Ordering::SeqCst), 0);

    let address = host.address_of("main", "abc").unwrap();
    assert!(host.live_runtime(address).is_none());
    assert_eq!(host.slot_count(), 0);
}

#[tokio::test]
async fn test_request_hook_error_is_401() {
    let worker = ModuleWorker::new()
        .on_request(|_request, _room| async { Ok(RoomResponse::text(200, "inside")) })
        .on_before_request(|request: RoomRequest, _lobby| async move {
            match request.header("authorization") {
                Some("Bearer good") => Ok(HookReturn::Continue),
                _ => Err(HandlerError::new("invalid token")),
            }
        });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let denied = host.fetch(RoomRequest::get("http://h/party/abc")).await;
    assert_eq!(denied.status, 401);
    assert_eq!(denied.body_text(), "invalid token");

    let allowed = host
        .fetch(RoomRequest::get("http://h/party/abc").with_header("Authorization", "Bearer good"))
        .await;
    assert_eq!(allowed.body_text(), "inside");
}

#[tokio::test]
async fn test_connect_hook_rewrite_reaches_on_connect() {
    let worker = ModuleWorker::new()
        .on_before_connect(|request: RoomRequest, lobby| async move {
            assert_eq!(lobby.id, "abc");
            assert_eq!(lobby.party, "main");
            Ok(HookReturn::Request(request.with_header("X-Auth", "ok")))
        })
        .on_connect(|connection, ctx, _room| async move {
            let seen = ctx.request.header("x-auth").unwrap_or("missing").to_string();
            connection.send(seen)?;
            Ok(())
        });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (_client, mut events) = connect(&host, "http://h/party/abc?_pk=a").await;
    assert_eq!(next_text(&mut events).await, "ok");
}

#[tokio::test]
async fn test_fetch_hook_catches_unrouted_paths() {
    let worker = ModuleWorker::new().on_fetch(|request: RoomRequest, ctx| async move {
        let parties = ctx.parties.names().join(",");
        Ok(RoomResponse::text(200, &format!("{} via {parties}", request.method)))
    });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let response = host.fetch(RoomRequest::get("http://h/about")).await;
    assert_eq!(response.body_text(), "GET via main");
}

// ============================================================================
// Test: Connections
// ============================================================================

#[tokio::test]
async fn test_on_connect_failure_closes_socket_with_reason() {
    let worker = ModuleWorker::new()
        .on_connect(|_connection, _ctx, _room| async { Err(HandlerError::new("room is full")) });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (client, mut events) = connect(&host, "http://h/party/abc?_pk=a").await;

    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Close(CloseFrame {
            code: ABNORMAL_CLOSURE_CODE,
            reason: "room is full".into(),
        })
    );
    assert!(!client.is_open());
}

#[tokio::test]
async fn test_tags_failure_closes_unaccepted_socket() {
    let worker = ModuleWorker::new()
        .get_connection_tags(|_connection, _ctx, _room| async {
            Err(HandlerError::new("tags unavailable"))
        })
        .on_connect(|_connection, _ctx, _room| async { Ok(()) });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let response = host
        .fetch(RoomRequest::websocket("http://h/party/abc?_pk=a"))
        .await;
    assert_eq!(response.status, SWITCHING_PROTOCOLS);
    let client = response.web_socket.unwrap();
    let mut events = client.take_events().unwrap();

    assert_eq!(
        next_event(&mut events).await,
        SocketEvent::Close(CloseFrame {
            code: ABNORMAL_CLOSURE_CODE,
            reason: "tags unavailable".into(),
        })
    );
    assert_eq!(client.ready_state(), ReadyState::Closed);
    assert_eq!(client.close_frame().unwrap().code, ABNORMAL_CLOSURE_CODE);

    let address = host.address_of("main", "abc").unwrap();
    assert_eq!(host.live_runtime(address).unwrap().room().connection_count(), 0);
}

#[tokio::test]
async fn test_get_connection_by_id() {
    let worker = ModuleWorker::new().on_request(|request: RoomRequest, room| async move {
        let id = request.query_param("id").unwrap_or_default();
        let body = match room.get_connection(&id)? {
            Some(connection) => format!("found {}", connection.id()),
            None => "missing".to_string(),
        };
        Ok(RoomResponse::text(200, &body))
    });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (_alice, _events) = connect(&host, "http://h/party/abc?_pk=alice").await;

    let found = host
        .fetch(RoomRequest::get("http://h/party/abc?id=alice"))
        .await;
    assert_eq!(found.body_text(), "found alice");

    let missing = host.fetch(RoomRequest::get("http://h/party/abc?id=bob")).await;
    assert_eq!(missing.body_text(), "missing");
}

#[tokio::test]
async fn test_duplicate_connection_id_is_refused() {
    let host = whoami_host(&Arc::new(AtomicUsize::new(0)));

    let (first, _first_events) = connect(&host, "http://h/party/abc?_pk=alice").await;
    let (_second, mut second_events) = connect(&host, "http://h/party/abc?_pk=alice").await;

    match next_event(&mut second_events).await {
        SocketEvent::Close(frame) => assert_eq!(frame.code, ABNORMAL_CLOSURE_CODE),
        other => panic!("expected a close, got {other:?}"),
    }
    assert!(first.is_open());
}

#[tokio::test]
async fn test_connection_tags_filter_roster() {
    let worker = ModuleWorker::new()
        .get_connection_tags(|_connection, ctx, _room| async move {
            Ok(ctx.request.query_param("team").into_iter().collect())
        })
        .on_request(|request: RoomRequest, room| async move {
            let team = request.query_param("team");
            let ids: Vec<String> = room
                .get_connections(team.as_deref())
                .map(|connection| connection.id().to_string())
                .collect();
            Ok(RoomResponse::json(200, &json!(ids)))
        });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let _a = connect(&host, "http://h/party/abc?_pk=a&team=red").await;
    let _b = connect(&host, "http://h/party/abc?_pk=b&team=blue").await;

    let red = host
        .fetch(RoomRequest::get("http://h/party/abc?team=red"))
        .await;
    assert_eq!(red.body_text(), r#"["a"]"#);

    let everyone = host.fetch(RoomRequest::get("http://h/party/abc")).await;
    let mut ids: Vec<String> = serde_json::from_slice(&everyone.body).unwrap();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
}

#[tokio::test]
async fn test_broadcast_skips_sender() {
    let worker = ModuleWorker::new().on_message(|message, connection, room| async move {
        let text = message.as_text().unwrap_or_default().to_string();
        room.broadcast(format!("{}: {text}", connection.id()), &[connection.id()]);
        Ok(())
    });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (alice, mut alice_events) = connect(&host, "http://h/party/abc?_pk=alice").await;
    let (_bob, mut bob_events) = connect(&host, "http://h/party/abc?_pk=bob").await;

    alice.send("hello").unwrap();
    assert_eq!(next_text(&mut bob_events).await, "alice: hello");

    let nothing = tokio::time::timeout(Duration::from_millis(50), alice_events.next()).await;
    assert!(nothing.is_err());

    let address = host.address_of("main", "abc").unwrap();
    let runtime = host.live_runtime(address).unwrap();
    assert_eq!(runtime.broadcast("announcement", &["bob"]), 1);
    assert_eq!(next_text(&mut alice_events).await, "announcement");
}

// ============================================================================
// Test: Hibernation
// ============================================================================

#[tokio::test]
async fn test_identity_survives_hibernation() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let host = whoami_host(&constructed);

    let (client, mut events) = connect(&host, "http://h/parties/main/lobby?_pk=alice").await;
    client.send("who").unwrap();
    assert_eq!(next_text(&mut events).await, "alice:lobby");
    assert_eq!(constructed.load(Ordering::SeqCst), 1);

    let address = host.address_of("main", "lobby").unwrap();
    assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);
    assert_eq!(host.held_sockets(address), 1);

    client.send("who").unwrap();
    assert_eq!(next_text(&mut events).await, "alice:lobby");
    assert_eq!(constructed.load(Ordering::SeqCst), 2);

    client.send("who again").unwrap();
    assert_eq!(next_text(&mut events).await, "alice:lobby");
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_in_memory_room_stays_resident_while_connected() {
    let worker = ModuleWorker::new().on_connect(|_connection, _ctx, _room| async { Ok(()) });
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (client, _events) = connect(&host, "http://h/party/abc?_pk=a").await;
    let address = host.address_of("main", "abc").unwrap();
    let runtime = host.live_runtime(address).unwrap();

    assert_eq!(host.hibernate(address), HibernateOutcome::Refused);
    assert_eq!(host.held_sockets(address), 0);

    client.close(1000, "bye");
    wait_until(|| runtime.room().connection_count() == 0).await;
    assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);
}

#[tokio::test]
async fn test_module_handlers_always_receive_room() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let record = |label: &'static str, seen: &Arc<Mutex<Vec<String>>>, room: &Room| {
        seen.lock().push(format!("{label}:{}", room.id()));
    };

    let worker = {
        let (s1, s2, s3, s4, s5) = (
            seen.clone(),
            seen.clone(),
            seen.clone(),
            seen.clone(),
            seen.clone(),
        );
        ModuleWorker::new()
            .on_start(move |room| {
                record("start", &s1, &*room);
                async { Ok(()) }
            })
            .on_connect(move |_connection, _ctx, room| {
                record("connect", &s2, &*room);
                async { Ok(()) }
            })
            .on_message(move |_message, _connection, room| {
                record("message", &s3, &*room);
                async { Ok(()) }
            })
            .on_close(move |_connection, _frame, room| {
                record("close", &s4, &*room);
                async { Ok(()) }
            })
            .on_request(move |_request, room| {
                record("request", &s5, &*room);
                async { Ok(RoomResponse::empty(204)) }
            })
    };
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let (client, _events) = connect(&host, "http://h/party/abc?_pk=a").await;
    let address = host.address_of("main", "abc").unwrap();
    assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);

    client.send("hi").unwrap();
    wait_until(|| seen.lock().iter().any(|entry| entry.starts_with("message"))).await;
    client.close(1000, "bye");
    wait_until(|| seen.lock().iter().any(|entry| entry.starts_with("close"))).await;
    host.fetch(RoomRequest::get("http://h/party/abc")).await;

    let seen = seen.lock();
    assert_eq!(
        *seen,
        vec![
            "start:abc",
            "connect:abc",
            "start:abc",
            "message:abc",
            "close:abc",
            "request:abc",
        ]
    );
}

/// Class server that counts `onStart` calls and echoes messages.
struct Tally {
    starts: Arc<AtomicUsize>,
}

#[async_trait]
impl PartyServer for Tally {
    async fn on_start(&self) -> HandlerResult {
        // Hold the start open so concurrent wakes overlap it.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_message(&self, message: WsMessage, connection: LazyConnection) -> HandlerResult {
        connection.send(message)?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_wakes_start_worker_once_per_cycle() {
    const CLIENTS: usize = 16;

    let constructed = Arc::new(AtomicUsize::new(0));
    let starts = Arc::new(AtomicUsize::new(0));
    let worker = {
        let constructed = constructed.clone();
        let starts = starts.clone();
        ClassWorker::new(move |_room| {
            constructed.fetch_add(1, Ordering::SeqCst);
            Tally {
                starts: starts.clone(),
            }
        })
        .hibernate(true)
    };
    let host = LocalHost::builder().party("main", worker).build().unwrap();

    let spawn_connects = |range: std::ops::Range<usize>| {
        range
            .map(|i| {
                let host = host.clone();
                tokio::spawn(async move {
                    connect(&host, &format!("http://h/party/busy?_pk=c{i}")).await
                })
            })
            .collect::<Vec<_>>()
    };

    // Cold start: every connect races to construct the worker.
    let mut clients = Vec::new();
    for task in spawn_connects(0..CLIENTS) {
        clients.push(task.await.unwrap());
    }
    assert_eq!(constructed.load(Ordering::SeqCst), 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert!(clients.iter().all(|(client, _)| client.is_open()));

    let address = host.address_of("main", "busy").unwrap();
    assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);
    assert_eq!(host.held_sockets(address), CLIENTS);

    // Warm wake: held sockets and fresh connects arrive together.
    let late = spawn_connects(CLIENTS..CLIENTS * 2);
    for (client, _) in &clients {
        client.send("ping").unwrap();
    }
    for (_, events) in clients.iter_mut() {
        assert_eq!(next_text(events).await, "ping");
    }
    let mut late_clients = Vec::new();
    for task in late {
        late_clients.push(task.await.unwrap());
    }
    assert!(late_clients.iter().all(|(client, _)| client.is_open()));

    assert_eq!(constructed.load(Ordering::SeqCst), 2);
    assert_eq!(starts.load(Ordering::SeqCst), 2);
    assert_eq!(host.held_sockets(address), CLIENTS * 2);
}

// ============================================================================
// Test: Storage and Alarms
// ============================================================================

/// Counts alarms in storage and reports whether the room knew its id.
struct Clock {
    room: Arc<Room>,
}

#[async_trait]
impl PartyServer for Clock {
    async fn on_request(&self, request: RoomRequest) -> HandlerResult<RoomResponse> {
        let storage = self.room.storage();
        if request.method == "POST" {
            storage
                .set_alarm(SystemTime::now() + Duration::from_secs(1))
                .await?;
            return Ok(RoomResponse::empty(202));
        }

        let alarms = storage.get("alarms").await?.unwrap_or(json!(0));
        Ok(RoomResponse::json(200, &alarms))
    }

    async fn on_alarm(&self) -> HandlerResult {
        let storage = self.room.storage();
        let count = storage
            .get("alarms")
            .await?
            .and_then(|value| value.as_u64())
            .unwrap_or(0);
        storage.put("alarms", json!(count + 1)).await?;
        storage
            .put("alarm_saw_id", json!(self.room.try_id().is_some()))
            .await?;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_alarm_wakes_hibernated_room() {
    let host = LocalHost::builder()
        .party("main", ClassWorker::new(|room| Clock { room }).hibernate(true))
        .build()
        .unwrap();

    let scheduled = host
        .fetch(RoomRequest::new("POST", "http://h/party/clock"))
        .await;
    assert_eq!(scheduled.status, 202);

    let address = host.address_of("main", "clock").unwrap();
    assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let runtime = host.live_runtime(address).expect("alarm woke the room");
    assert!(runtime.room().try_id().is_none());
    assert_eq!(
        runtime.room().storage().get("alarm_saw_id").await.unwrap(),
        Some(json!(false))
    );

    let count = host.fetch(RoomRequest::get("http://h/party/clock")).await;
    assert_eq!(count.body_text(), "1");
    assert_eq!(runtime.room().try_id(), Some("clock"));
}

// ============================================================================
// Test: Cross-party Calls
// ============================================================================

#[tokio::test]
async fn test_room_calls_room_in_other_party() {
    let main = ModuleWorker::new().on_request(|_request, room| async move {
        let parties = room
            .parties()
            .ok_or_else(|| HandlerError::new("no parties"))?;
        let stub = parties
            .get("echo")
            .ok_or_else(|| HandlerError::new("no echo party"))?
            .resolve("target")?;
        let reply = stub.fetch(stub.request("GET")).await?;
        Ok(RoomResponse::text(200, &format!("echo said {}", reply.body_text())))
    });
    let echo = ModuleWorker::new()
        .on_request(|_request, room| async move { Ok(RoomResponse::text(200, room.id())) })
        .on_message(|message, connection, _room| async move {
            connection.send(message)?;
            Ok(())
        });
    let host = LocalHost::builder()
        .party("main", main)
        .party("echo", echo)
        .build()
        .unwrap();

    let response = host.fetch(RoomRequest::get("http://h/party/abc")).await;
    assert_eq!(response.body_text(), "echo said target");

    let address = host.address_of("echo", "target").unwrap();
    assert!(host.live_runtime(address).is_some());
}

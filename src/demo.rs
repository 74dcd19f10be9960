//! Demo workers shipped with the binary.
//!
//! - `chat`: module worker; relays every message to everyone else
//! - `counter`: class worker; keeps a counter in room storage

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use partyroom_core::{
    ClassWorker, ConnectionContext, HandlerResult, LazyConnection, ModuleWorker, PartyServer,
    Room, RoomRequest, RoomResponse, WorkerDefinition, WsMessage,
};

const COUNT_KEY: &str = "count";

/// Every worker the binary can bind to a party, by name.
pub fn registry() -> BTreeMap<&'static str, WorkerDefinition> {
    BTreeMap::from([
        ("chat", WorkerDefinition::from(chat())),
        ("counter", WorkerDefinition::from(counter())),
    ])
}

/// Chat room: relays messages and reports its population over HTTP.
pub fn chat() -> ModuleWorker {
    ModuleWorker::new()
        .on_connect(|connection, _ctx, room| async move {
            room.broadcast(
                json!({ "type": "joined", "id": connection.id() }).to_string(),
                &[connection.id()],
            );
            Ok(())
        })
        .on_message(|message, connection, room| async move {
            let payload = match &message {
                WsMessage::Text(text) => json!({ "from": connection.id(), "text": text }),
                WsMessage::Binary(bytes) => json!({ "from": connection.id(), "bytes": bytes.len() }),
            };
            room.broadcast(payload.to_string(), &[connection.id()]);
            Ok(())
        })
        .on_close(|connection, _frame, room| async move {
            room.broadcast(
                json!({ "type": "left", "id": connection.id() }).to_string(),
                &[connection.id()],
            );
            Ok(())
        })
        .on_request(|_request, room| async move {
            Ok(RoomResponse::json(
                200,
                &json!({ "room": room.id(), "connections": room.connection_count() }),
            ))
        })
}

/// Counter room: every message increments a stored counter.
pub fn counter() -> ClassWorker {
    ClassWorker::new(|room| Counter { room }).hibernate(true)
}

struct Counter {
    room: Arc<Room>,
}

impl Counter {
    async fn value(&self) -> HandlerResult<u64> {
        let stored = self.room.storage().get(COUNT_KEY).await?;
        Ok(stored.and_then(|value| value.as_u64()).unwrap_or(0))
    }
}

#[async_trait]
impl PartyServer for Counter {
    async fn on_connect(&self, connection: LazyConnection, _ctx: ConnectionContext) -> HandlerResult {
        connection.send(json!({ "count": self.value().await? }).to_string())?;
        Ok(())
    }

    async fn on_message(&self, _message: WsMessage, _connection: LazyConnection) -> HandlerResult {
        let next = self.value().await? + 1;
        self.room.storage().put(COUNT_KEY, json!(next)).await?;
        self.room.broadcast(json!({ "count": next }).to_string(), &[]);
        Ok(())
    }

    async fn on_request(&self, request: RoomRequest) -> HandlerResult<RoomResponse> {
        match request.method.as_str() {
            "GET" => Ok(RoomResponse::json(200, &json!({ "count": self.value().await? }))),
            "DELETE" => {
                self.room.storage().delete(COUNT_KEY).await?;
                Ok(RoomResponse::empty(204))
            }
            _ => Ok(RoomResponse::text(405, "Method not allowed")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use partyroom_core::{SocketEvent, SocketEvents};
    use partyroom_host::{HibernateOutcome, LocalHost};
    use tokio_test::assert_ok;

    use super::*;

    fn host() -> LocalHost {
        LocalHost::builder()
            .party("main", chat())
            .party("counter", counter())
            .build()
            .unwrap()
    }

    async fn next_text(events: &mut SocketEvents) -> String {
        match tokio::time::timeout(Duration::from_secs(5), events.next()).await {
            Ok(Some(SocketEvent::Message(WsMessage::Text(text)))) => text,
            other => panic!("expected a text message, got {other:?}"),
        }
    }

    #[test]
    fn test_registry_validates() {
        let registry = registry();
        assert_eq!(registry.keys().copied().collect::<Vec<_>>(), vec!["chat", "counter"]);
        for definition in registry.values() {
            assert_ok!(definition.validate());
            assert!(definition.supports_hibernation());
        }
    }

    #[tokio::test]
    async fn test_chat_relays_to_others() {
        let host = host();

        let alice = host
            .fetch(RoomRequest::websocket("http://h/party/lobby?_pk=alice"))
            .await
            .web_socket
            .unwrap();
        let mut alice_events = alice.take_events().unwrap();
        alice.accept().unwrap();

        let bob = host
            .fetch(RoomRequest::websocket("http://h/party/lobby?_pk=bob"))
            .await
            .web_socket
            .unwrap();
        bob.accept().unwrap();

        assert_eq!(
            next_text(&mut alice_events).await,
            r#"{"id":"bob","type":"joined"}"#
        );

        bob.send("hi").unwrap();
        assert_eq!(
            next_text(&mut alice_events).await,
            r#"{"from":"bob","text":"hi"}"#
        );

        let status = host.fetch(RoomRequest::get("http://h/party/lobby")).await;
        assert_eq!(status.body_text(), r#"{"connections":2,"room":"lobby"}"#);
    }

    #[tokio::test]
    async fn test_counter_persists_across_hibernation() {
        let host = host();

        let client = host
            .fetch(RoomRequest::websocket("http://h/parties/counter/c?_pk=a"))
            .await
            .web_socket
            .unwrap();
        let mut events = client.take_events().unwrap();
        client.accept().unwrap();
        assert_eq!(next_text(&mut events).await, r#"{"count":0}"#);

        client.send("+").unwrap();
        assert_eq!(next_text(&mut events).await, r#"{"count":1}"#);

        let address = host.address_of("counter", "c").unwrap();
        assert_eq!(host.hibernate(address), HibernateOutcome::Evicted);

        client.send("+").unwrap();
        assert_eq!(next_text(&mut events).await, r#"{"count":2}"#);

        let count = host
            .fetch(RoomRequest::get("http://h/parties/counter/c"))
            .await;
        assert_eq!(count.body_text(), r#"{"count":2}"#);
    }
}

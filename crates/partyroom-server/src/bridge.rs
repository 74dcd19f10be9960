//! Bridges real WebSockets onto room socket pairs.
//!
//! A room answers an upgrade with the `client` end of a socket pair. The
//! bridge pumps frames between that end and the upgraded connection until
//! either side closes:
//! - frames from the network are sent on the client end
//! - events on the client end are written to the network
//!
//! A client end the room already closed (a refused connection) still has
//! its close event queued, so the network peer sees the recorded code and
//! reason.

use std::borrow::Cow;

use axum::extract::ws::{CloseFrame as WireCloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use partyroom_core::{
    ABNORMAL_CLOSURE_CODE, ABNORMAL_DROP_CODE, NORMAL_CLOSURE_CODE, ReadyState, SocketEvent,
    SocketHandle, WsMessage,
};

/// Close code to put on the wire for a recorded code.
///
/// Codes reserved for local use (no status, abnormal drop, TLS failure)
/// may not be sent in a close frame.
pub fn wire_close_code(code: u16) -> u16 {
    match code {
        1005 | 1015 | ABNORMAL_DROP_CODE => ABNORMAL_CLOSURE_CODE,
        code => code,
    }
}

fn close_message(code: u16, reason: String) -> Message {
    Message::Close(Some(WireCloseFrame {
        code: wire_close_code(code),
        reason: Cow::Owned(reason),
    }))
}

/// Pump frames between `ws` and the room socket `client` until either closes.
pub async fn bridge(mut ws: WebSocket, client: SocketHandle) {
    let Some(mut events) = client.take_events() else {
        warn!(socket = %client.handle_id(), "Room socket is already bridged");
        let _ = ws
            .send(close_message(ABNORMAL_CLOSURE_CODE, "socket unavailable".into()))
            .await;
        return;
    };

    if client.ready_state() == ReadyState::Connecting {
        // Fails only if the room closed the pair first.
        let _ = client.accept();
    }

    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            biased;

            event = events.next() => {
                let outbound = match event {
                    Some(SocketEvent::Message(WsMessage::Text(text))) => Message::Text(text),
                    Some(SocketEvent::Message(WsMessage::Binary(bytes))) => Message::Binary(bytes.to_vec()),
                    Some(SocketEvent::Close(frame)) => {
                        debug!(code = frame.code, "Room closed the connection");
                        let _ = sink.send(close_message(frame.code, frame.reason)).await;
                        break;
                    }
                    Some(SocketEvent::Error(reason)) => {
                        debug!(reason = %reason, "Room connection failed");
                        let _ = sink.send(close_message(ABNORMAL_CLOSURE_CODE, reason)).await;
                        break;
                    }
                    None => break,
                };
                if sink.send(outbound).await.is_err() {
                    client.fail("network connection lost");
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = client.send(text) {
                            debug!(error = %e, "Dropped inbound frame");
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        if let Err(e) = client.send(bytes) {
                            debug!(error = %e, "Dropped inbound frame");
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((NORMAL_CLOSURE_CODE, String::new()), |f| {
                            (f.code, f.reason.into_owned())
                        });
                        client.close(code, reason);
                        break;
                    }
                    Some(Err(e)) => {
                        client.fail(e.to_string());
                        break;
                    }
                    None => {
                        client.fail("network connection closed without a close frame");
                        break;
                    }
                }
            }
        }
    }

    debug!(socket = %client.handle_id(), "Bridge finished");
}

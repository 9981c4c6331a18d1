use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use corral_types::error::ChatError;
use corral_types::events::{GatewayCommand, GatewayEvent};

use crate::registry::RoomRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive a pre-authenticated WebSocket connection until it closes.
/// The JWT was already validated at the HTTP upgrade layer, so the
/// connection goes straight to Ready and the event loop.
///
/// On exit — clean close, transport error, or heartbeat timeout — the
/// connection is unregistered, which drops all of its room memberships.
pub async fn handle_connection(socket: WebSocket, registry: RoomRegistry, user_id: Uuid) {
    let (mut sender, receiver) = socket.split();

    info!("{} connected to gateway", user_id);

    let ready = GatewayEvent::Ready { user_id };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let (conn_id, mut outbound) = registry.register(user_id);

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room fan-out -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = outbound.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "{} heartbeat timeout (missed {} pongs), dropping connection",
                                user_id, missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let registry_recv = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        read_commands(receiver, registry_recv, conn_id, user_id, pong_flag_recv).await;
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.unregister(conn_id);
    info!("{} disconnected from gateway", user_id);
}

async fn read_commands(
    mut receiver: SplitStream<WebSocket>,
    registry: RoomRegistry,
    conn_id: Uuid,
    user_id: Uuid,
    pong_flag: Arc<AtomicBool>,
) {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                Ok(cmd) => handle_command(&registry, conn_id, user_id, cmd),
                Err(e) => {
                    warn!(
                        "{} bad frame: {} -- raw: {}",
                        user_id,
                        e,
                        frame_preview(&text)
                    );
                }
            },
            Message::Pong(_) => {
                pong_flag.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Dispatch one client command. Exhaustive over the closed command set;
/// adding a command kind is a compile error until it is handled here.
///
/// The gateway is a thin fan-out layer: it never touches the durable
/// store, so no store errors can surface from here. A broadcast into an
/// empty room simply has zero recipients.
fn handle_command(registry: &RoomRegistry, conn_id: Uuid, user_id: Uuid, cmd: GatewayCommand) {
    match cmd {
        GatewayCommand::JoinRoom { conversation_id } => {
            debug!("{} joined room {}", user_id, conversation_id);
            registry.join(conn_id, conversation_id);
        }

        GatewayCommand::LeaveRoom { conversation_id } => {
            debug!("{} left room {}", user_id, conversation_id);
            registry.leave(conn_id, conversation_id);
        }

        // Relay of an already-persisted message. Whether the durable
        // append has landed yet is the sending client's business; the
        // relay itself carries no ordering guarantee against the store.
        GatewayCommand::SendMessage {
            conversation_id,
            message,
        } => {
            registry.broadcast_to_room(
                conversation_id,
                conn_id,
                GatewayEvent::SendMessage {
                    conversation_id,
                    message,
                },
            );
        }

        GatewayCommand::Typing {
            conversation_id,
            user_id: typist,
            is_typing,
        } => {
            registry.broadcast_to_room(
                conversation_id,
                conn_id,
                GatewayEvent::Typing {
                    conversation_id,
                    user_id: typist,
                    is_typing,
                },
            );
        }

        GatewayCommand::ReadReceipt {
            conversation_id,
            user_id: reader,
        } => {
            registry.broadcast_to_room(
                conversation_id,
                conn_id,
                GatewayEvent::ReadReceipt {
                    conversation_id,
                    user_id: reader,
                },
            );
        }
    }
}

/// First 200 characters of an unparseable frame for logging. Cuts on a
/// char boundary; a raw byte slice could split a multibyte character
/// and panic the recv task.
fn frame_preview(text: &str) -> &str {
    text.char_indices()
        .nth(200)
        .map_or(text, |(i, _)| &text[..i])
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), ChatError> {
    let text =
        serde_json::to_string(event).map_err(|e| ChatError::Transport(e.to_string()))?;
    sender
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| ChatError::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use corral_types::models::Message as ChatMessage;

    fn message(sender_id: Uuid) -> ChatMessage {
        ChatMessage {
            sender_id,
            content: "hello".into(),
            attachments: vec![],
            sent_at: Utc::now(),
            read: false,
            read_at: None,
        }
    }

    #[test]
    fn frame_preview_cuts_on_char_boundaries() {
        // A four-byte emoji straddles the 200-byte mark.
        let frame = format!("{}😀{}", "x".repeat(199), "y".repeat(50));
        let preview = frame_preview(&frame);
        assert_eq!(preview.chars().count(), 200);
        assert!(preview.ends_with('😀'));

        let short = "not json";
        assert_eq!(frame_preview(short), short);
    }

    #[test]
    fn send_message_fans_out_to_other_members_only() {
        let registry = RoomRegistry::new();
        let room = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (alice_conn, mut alice_rx) = registry.register(alice);
        let (bob_conn, mut bob_rx) = registry.register(bob);

        handle_command(&registry, alice_conn, alice, GatewayCommand::JoinRoom {
            conversation_id: room,
        });
        handle_command(&registry, bob_conn, bob, GatewayCommand::JoinRoom {
            conversation_id: room,
        });

        handle_command(&registry, alice_conn, alice, GatewayCommand::SendMessage {
            conversation_id: room,
            message: message(alice),
        });

        match bob_rx.try_recv() {
            Ok(GatewayEvent::SendMessage {
                conversation_id, ..
            }) => assert_eq!(conversation_id, room),
            other => panic!("expected relayed message, got {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[test]
    fn typing_stops_after_leave() {
        let registry = RoomRegistry::new();
        let room = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        let (alice_conn, _alice_rx) = registry.register(alice);
        let (bob_conn, mut bob_rx) = registry.register(bob);
        registry.join(alice_conn, room);
        registry.join(bob_conn, room);

        let typing = GatewayCommand::Typing {
            conversation_id: room,
            user_id: alice,
            is_typing: true,
        };
        handle_command(&registry, alice_conn, alice, typing.clone());
        assert!(matches!(
            bob_rx.try_recv(),
            Ok(GatewayEvent::Typing { is_typing: true, .. })
        ));

        handle_command(&registry, bob_conn, bob, GatewayCommand::LeaveRoom {
            conversation_id: room,
        });
        handle_command(&registry, alice_conn, alice, typing);
        assert!(bob_rx.try_recv().is_err());
    }

    #[test]
    fn read_receipt_reaches_multi_device_peer() {
        let registry = RoomRegistry::new();
        let room = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        // Bob is joined from two devices; both get the receipt.
        let (alice_conn, _alice_rx) = registry.register(alice);
        let (bob_phone, mut phone_rx) = registry.register(bob);
        let (bob_laptop, mut laptop_rx) = registry.register(bob);
        registry.join(alice_conn, room);
        registry.join(bob_phone, room);
        registry.join(bob_laptop, room);

        handle_command(&registry, alice_conn, alice, GatewayCommand::ReadReceipt {
            conversation_id: room,
            user_id: alice,
        });

        assert!(matches!(
            phone_rx.try_recv(),
            Ok(GatewayEvent::ReadReceipt { .. })
        ));
        assert!(matches!(
            laptop_rx.try_recv(),
            Ok(GatewayEvent::ReadReceipt { .. })
        ));
    }
}

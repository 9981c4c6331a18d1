use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Commands sent FROM client TO server over the WebSocket gateway.
///
/// A closed set: every event kind the gateway understands is a variant
/// here, and dispatch is an exhaustive match. Wire names mirror the
/// room event names clients already use (`join-room`, `send-message`,
/// ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayCommand {
    /// Register this connection into the conversation's room.
    /// Membership authorization is enforced by the Conversation API on
    /// the durable path, not here; the gateway is a thin fan-out layer.
    JoinRoom { conversation_id: Uuid },

    /// Deregister from the room.
    LeaveRoom { conversation_id: Uuid },

    /// Relay an already-persisted message to the other room members.
    /// The gateway does not persist; the client appends through the
    /// Conversation API first and broadcasts the returned message.
    SendMessage {
        conversation_id: Uuid,
        message: Message,
    },

    /// Ephemeral typing indicator; last-write-wins at the UI layer.
    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// Read notification, paired with a durable mark-read call through
    /// the Conversation API.
    ReadReceipt {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

/// Events sent FROM server TO room members. Room-scoped events mirror
/// the command names and payloads, fanned out to every *other*
/// connection joined to the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum GatewayEvent {
    /// Sent once after upgrade: confirms the authenticated identity.
    Ready { user_id: Uuid },

    SendMessage {
        conversation_id: Uuid,
        message: Message,
    },

    Typing {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    ReadReceipt {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_kebab_case_wire_names() {
        let conversation_id = Uuid::new_v4();
        let frame = serde_json::json!({
            "type": "join-room",
            "data": { "conversation_id": conversation_id },
        });

        let cmd: GatewayCommand = serde_json::from_value(frame).unwrap();
        match cmd {
            GatewayCommand::JoinRoom { conversation_id: cid } => {
                assert_eq!(cid, conversation_id);
            }
            other => panic!("decoded wrong variant: {:?}", other),
        }
    }

    #[test]
    fn typing_frame_carries_flag() {
        let frame = serde_json::json!({
            "type": "typing",
            "data": {
                "conversation_id": Uuid::new_v4(),
                "user_id": Uuid::new_v4(),
                "is_typing": true,
            },
        });

        let cmd: GatewayCommand = serde_json::from_value(frame).unwrap();
        assert!(matches!(cmd, GatewayCommand::Typing { is_typing: true, .. }));
    }

    #[test]
    fn events_encode_with_type_envelope() {
        let event = GatewayEvent::ReadReceipt {
            conversation_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "read-receipt");
        assert!(value["data"]["conversation_id"].is_string());
    }
}

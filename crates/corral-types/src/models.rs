use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A durable two-party message thread, optionally scoped to a
/// marketplace listing. Participants are fixed at creation; the pair is
/// treated as unordered for lookups but stored in creation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub listing_id: Option<Uuid>,
    /// Append-only; insertion order is the only defined order.
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    /// false means archived: hidden from listings and pair lookups,
    /// messages still readable.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }
}

/// A single message, owned by its parent conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender_id: Uuid,
    /// May be empty only when attachments are present.
    pub content: String,
    /// Opaque attachment URIs; storage semantics live elsewhere.
    pub attachments: Vec<String>,
    /// Non-decreasing within a conversation.
    pub sent_at: DateTime<Utc>,
    pub read: bool,
    /// Set exactly once, when `read` first flips to true.
    pub read_at: Option<DateTime<Utc>>,
}

//! Database row types — these map directly to SQLite rows.
//! Distinct from the corral-types domain model to keep the store layer
//! independent.

pub struct ConversationRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub listing_id: Option<String>,
    pub last_activity: String,
    pub active: bool,
    pub created_at: String,
}

impl ConversationRow {
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participant_a == user_id || self.participant_b == user_id
    }
}

pub struct MessageRow {
    pub sender_id: String,
    pub content: String,
    pub attachments: String,
    pub sent_at: String,
    pub read: bool,
    pub read_at: Option<String>,
}

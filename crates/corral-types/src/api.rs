use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between corral-api (REST middleware) and
/// corral-server (WebSocket upgrade authentication). Identity issuance
/// lives in an external auth service; we only validate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
pub struct GetOrCreateQuery {
    pub listing_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub message: &'static str,
    /// Number of messages newly flipped to read; 0 on repeat calls.
    pub updated: usize,
}

#[derive(Debug, Serialize)]
pub struct ArchiveResponse {
    pub message: &'static str,
}

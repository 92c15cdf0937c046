use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Booking, HandoffStep, Message};

// -- JWT Claims --

/// Claims issued by the external identity provider. Shared by courier-api
/// (REST middleware) and courier-server (WebSocket upgrade).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Returned instead of a message when the chat input was a valid delivery code.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveredResponse {
    pub delivered: bool,
    pub booking: Booking,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub message_ids: Vec<Uuid>,
    pub read_at: Option<DateTime<Utc>>,
}

// -- Handoff --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HandoffRequest {
    pub step: HandoffStep,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HandoffResponse {
    pub booking: Booking,
    pub system_message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryCodeRequest {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryCodeResponse {
    pub valid: bool,
}

// -- Inbox --

#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadTotalResponse {
    pub total: u64,
}

// -- Ratings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRatingRequest {
    pub rated_id: Uuid,
    /// Wide integer so out-of-range scores reach validation instead of
    /// failing deserialization.
    pub score: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

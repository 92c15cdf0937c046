use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BookingStatus, HandoffStep, Message};

/// A persisted change inside one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ChangeEvent {
    /// A message (user or system) was appended.
    MessageCreate { message: Message },

    /// The recipient marked these messages read.
    MessageRead {
        message_ids: Vec<Uuid>,
        read_at: DateTime<Utc>,
    },

    /// The handoff state machine advanced the booking.
    BookingUpdate {
        status: BookingStatus,
        handoff_step: HandoffStep,
    },
}

/// Position in a conversation topic's event stream. `epoch` changes every
/// time the topic is recreated, so a matching epoch plus a contiguous `seq`
/// proves nothing was missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub epoch: Uuid,
    pub seq: u64,
}

/// A change event stamped with its position in the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub booking_id: Uuid,
    pub epoch: Uuid,
    pub seq: u64,
    pub event: ChangeEvent,
}

impl Envelope {
    pub fn position(&self) -> ResumePoint {
        ResumePoint {
            epoch: self.epoch,
            seq: self.seq,
        }
    }
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms the authenticated connection
    Ready { user_id: Uuid },

    /// Subscription is live. `resync` tells the client its local view may
    /// be missing events and must be reloaded over REST.
    Subscribed {
        booking_id: Uuid,
        epoch: Uuid,
        seq: u64,
        resync: bool,
    },

    /// Subscription released
    Unsubscribed { booking_id: Uuid },

    /// A change in a subscribed conversation
    Event(Envelope),

    /// The subscription fell behind the topic and dropped events
    Lagged { booking_id: Uuid, missed: u64 },

    /// Inbox badge total, pushed by the connection's unread poller
    UnreadTotal { total: u64 },

    /// A command could not be honored
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Open a conversation feed. `resume` is the last position the client
    /// applied, if it is reconnecting.
    Subscribe {
        booking_id: Uuid,
        #[serde(default)]
        resume: Option<ResumePoint>,
    },

    /// Close a conversation feed
    Unsubscribe { booking_id: Uuid },

    /// Recompute the inbox badge now instead of waiting for the next poll
    RefreshUnread,
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Returned when a stored enum column holds a value this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// -- Bookings --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    HandedOver,
    Delivered,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::HandedOver => "handed_over",
            Self::Delivered => "delivered",
        }
    }

    /// Conversations exist from `approved` onward. Pending, rejected and
    /// cancelled bookings never get a chat surface.
    pub fn has_conversation(&self) -> bool {
        !matches!(self, Self::Pending | Self::Rejected | Self::Cancelled)
    }
}

impl FromStr for BookingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            "handed_over" => Ok(Self::HandedOver),
            "delivered" => Ok(Self::Delivered),
            other => Err(UnknownVariant {
                kind: "booking status",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of a booking a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Sender,
    Traveler,
}

/// Physical handoff progress. Steps only ever move forward, one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStep {
    None,
    SenderConfirmed,
    HandedOver,
    Delivered,
}

impl HandoffStep {
    pub const SEQUENCE: [HandoffStep; 4] = [
        HandoffStep::None,
        HandoffStep::SenderConfirmed,
        HandoffStep::HandedOver,
        HandoffStep::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::SenderConfirmed => "sender_confirmed",
            Self::HandedOver => "handed_over",
            Self::Delivered => "delivered",
        }
    }

    /// The only step reachable from this one.
    pub fn next(&self) -> Option<HandoffStep> {
        match self {
            Self::None => Some(Self::SenderConfirmed),
            Self::SenderConfirmed => Some(Self::HandedOver),
            Self::HandedOver => Some(Self::Delivered),
            Self::Delivered => None,
        }
    }

    /// Step that must be current for a transition into `self`.
    pub fn previous(&self) -> Option<HandoffStep> {
        match self {
            Self::None => None,
            Self::SenderConfirmed => Some(Self::None),
            Self::HandedOver => Some(Self::SenderConfirmed),
            Self::Delivered => Some(Self::HandedOver),
        }
    }

    /// Party allowed to perform the explicit transition into `self`.
    pub fn actor(&self) -> Option<ParticipantRole> {
        match self {
            Self::None => None,
            Self::SenderConfirmed => Some(ParticipantRole::Sender),
            Self::HandedOver | Self::Delivered => Some(ParticipantRole::Traveler),
        }
    }

    /// Booking status that accompanies this step once reached.
    /// `None` means the step leaves the status untouched.
    pub fn locked_status(&self) -> Option<BookingStatus> {
        match self {
            Self::HandedOver => Some(BookingStatus::HandedOver),
            Self::Delivered => Some(BookingStatus::Delivered),
            _ => None,
        }
    }

    pub fn system_code(&self) -> Option<SystemMessageCode> {
        match self {
            Self::None => None,
            Self::SenderConfirmed => Some(SystemMessageCode::SenderConfirmed),
            Self::HandedOver => Some(SystemMessageCode::HandedOver),
            Self::Delivered => Some(SystemMessageCode::Delivered),
        }
    }
}

impl FromStr for HandoffStep {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "sender_confirmed" => Ok(Self::SenderConfirmed),
            "handed_over" => Ok(Self::HandedOver),
            "delivered" => Ok(Self::Delivered),
            other => Err(UnknownVariant {
                kind: "handoff step",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for HandoffStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub traveler_id: Uuid,
    pub announcement_id: Uuid,
    pub requested_kilos: f64,
    pub status: BookingStatus,
    pub handoff_step: HandoffStep,
    /// Only ever shown to the traveler who generated it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn role_of(&self, user_id: Uuid) -> Option<ParticipantRole> {
        if user_id == self.sender_id {
            Some(ParticipantRole::Sender)
        } else if user_id == self.traveler_id {
            Some(ParticipantRole::Traveler)
        } else {
            None
        }
    }

    pub fn counterpart_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.role_of(user_id)? {
            ParticipantRole::Sender => Some(self.traveler_id),
            ParticipantRole::Traveler => Some(self.sender_id),
        }
    }

    /// Informational price: always the announcement's real per-kg price
    /// times the requested kilos.
    pub fn total_price(&self, price_per_kg: f64) -> f64 {
        self.requested_kilos * price_per_kg
    }

    /// Copy safe to hand to `viewer`: the delivery code is the sender's
    /// proof of handoff and must not leak to them through booking reads.
    pub fn redacted_for(&self, viewer: Uuid) -> Booking {
        let mut booking = self.clone();
        if viewer != self.traveler_id {
            booking.delivery_code = None;
        }
        booking
    }
}

// -- Messages --

/// Closed set of protocol messages written by the handoff state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemMessageCode {
    SenderConfirmed,
    HandedOver,
    Delivered,
}

impl SystemMessageCode {
    pub fn wire(&self) -> &'static str {
        match self {
            Self::SenderConfirmed => "[HANDOFF] sender_confirmed",
            Self::HandedOver => "[HANDOFF] handed_over",
            Self::Delivered => "[HANDOFF] delivered",
        }
    }

    pub fn from_wire(content: &str) -> Option<Self> {
        match content {
            "[HANDOFF] sender_confirmed" => Some(Self::SenderConfirmed),
            "[HANDOFF] handed_over" => Some(Self::HandedOver),
            "[HANDOFF] delivered" => Some(Self::Delivered),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::SenderConfirmed => "sender confirmed handoff",
            Self::HandedOver => "package handed over",
            Self::Delivered => "package delivered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_system: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Protocol code for rendering. User text that happens to look like a
    /// system code stays ordinary text: only `is_system` decides.
    pub fn system_code(&self) -> Option<SystemMessageCode> {
        if !self.is_system {
            return None;
        }
        SystemMessageCode::from_wire(&self.content)
    }

    /// Text to show in a chat bubble or inbox preview.
    pub fn display_text(&self) -> &str {
        match self.system_code() {
            Some(code) => code.label(),
            None => &self.content,
        }
    }
}

// -- Conversations --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counterpart {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteSummary {
    pub announcement_id: Uuid,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_date: NaiveDate,
    pub price_per_kg: f64,
    pub total_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// Derived inbox entry, recomputed on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub booking_id: Uuid,
    pub role: ParticipantRole,
    pub status: BookingStatus,
    pub handoff_step: HandoffStep,
    pub requested_kilos: f64,
    pub counterpart: Counterpart,
    pub route: RouteSummary,
    pub last_message: Option<MessagePreview>,
    pub unread_count: u32,
}

// -- Ratings --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub rater_id: Uuid,
    pub rated_id: Uuid,
    pub score: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: u32,
}

impl RatingSummary {
    pub const EMPTY: RatingSummary = RatingSummary {
        average: 0.0,
        count: 0,
    };
}

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_types::models::{HandoffStep, Message, ParticipantRole, SystemMessageCode};

use super::bookings::load_participant_booking;
use super::handoff::HandoffOutcome;
use crate::models::{MESSAGE_COLUMNS, message_from_row, parse_ts, ts};
use crate::{CourierError, Database, Result};

pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Messages flipped to read by one `mark_read` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReceipt {
    pub message_ids: Vec<Uuid>,
    /// `None` when there was nothing left to mark.
    pub read_at: Option<DateTime<Utc>>,
}

/// What happened to a line typed into the chat input.
#[derive(Debug)]
pub enum ChatOutcome {
    Sent(Message),
    /// The text was the delivery code; no chat message was stored.
    Delivered(HandoffOutcome),
}

/// Trim and bound-check user text. Length counts characters, not bytes.
pub fn validate_content(raw: &str) -> Result<&str> {
    let trimmed = raw.trim();
    let len = trimmed.chars().count();
    if len == 0 {
        return Err(CourierError::Validation("message is empty".into()));
    }
    if len > MAX_MESSAGE_CHARS {
        return Err(CourierError::Validation(format!(
            "message is {} characters, limit is {}",
            len, MAX_MESSAGE_CHARS
        )));
    }
    // SQLite's length() stops at the first NUL.
    if trimmed.contains('\0') {
        return Err(CourierError::Validation("message contains a NUL character".into()));
    }
    Ok(trimmed)
}

impl Database {
    /// Conversation log in display order. Empty conversations yield an empty vec.
    pub fn list_messages(&self, booking_id: Uuid, viewer_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| {
            load_participant_booking(conn, booking_id, viewer_id)?;
            query_messages(conn, booking_id)
        })
    }

    pub fn send_message(&self, booking_id: Uuid, sender_id: Uuid, content: &str) -> Result<Message> {
        let content = validate_content(content)?;

        self.with_conn_mut(|conn| {
            let booking = load_participant_booking(conn, booking_id, sender_id)?;
            if !booking.status.has_conversation() {
                return Err(CourierError::Conflict(format!(
                    "booking is {}, conversation is closed",
                    booking.status
                )));
            }
            insert_message(conn, booking_id, sender_id, content, false)
        })
    }

    /// Chat input path. While the package is handed over, anything the
    /// sender types is first tried as the delivery code; a miss falls
    /// through to a normal message.
    pub fn send_or_redeem(
        &self,
        booking_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<ChatOutcome> {
        let booking = self.with_conn(|conn| load_participant_booking(conn, booking_id, sender_id))?;

        if booking.role_of(sender_id) == Some(ParticipantRole::Sender)
            && booking.handoff_step == HandoffStep::HandedOver
        {
            match self.redeem_delivery_code(booking_id, content, sender_id) {
                Ok(Some(outcome)) => return Ok(ChatOutcome::Delivered(outcome)),
                Ok(None) => {}
                Err(e) => warn!("Delivery code check failed on {}, sending as chat: {}", booking_id, e),
            }
        }

        self.send_message(booking_id, sender_id, content)
            .map(ChatOutcome::Sent)
    }

    /// Marks every unread message from the other party as read, in one
    /// statement. Messages already read keep their original timestamp.
    pub fn mark_read(&self, booking_id: Uuid, reader_id: Uuid) -> Result<ReadReceipt> {
        self.with_conn_mut(|conn| {
            load_participant_booking(conn, booking_id, reader_id)?;

            let now = Utc::now();
            let mut stmt = conn.prepare(
                "UPDATE messages SET read_at = ?3
                 WHERE booking_id = ?1 AND sender_id != ?2 AND read_at IS NULL
                 RETURNING id",
            )?;
            let ids = stmt
                .query_map(
                    rusqlite::params![booking_id.to_string(), reader_id.to_string(), ts(now)],
                    |row| row.get::<_, String>(0),
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let message_ids = ids
                .iter()
                .map(|id| id.parse::<Uuid>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| CourierError::Storage { source: Box::new(e) })?;

            debug!("{} marked {} messages read in {}", reader_id, message_ids.len(), booking_id);
            let read_at = (!message_ids.is_empty()).then_some(now);
            Ok(ReadReceipt {
                message_ids,
                read_at,
            })
        })
    }
}

fn query_messages(conn: &Connection, booking_id: Uuid) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE booking_id = ?1
         ORDER BY created_at ASC, rowid ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([booking_id.to_string()], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Protocol message for a handoff transition. Only the handoff state machine
/// calls this, inside its transaction.
pub(crate) fn append_system_message(
    conn: &Connection,
    booking_id: Uuid,
    sender_id: Uuid,
    code: SystemMessageCode,
) -> Result<Message> {
    insert_message(conn, booking_id, sender_id, code.wire(), true)
}

/// Appends one row. `created_at` never goes below the newest message already
/// in the conversation, so insertion order and display order agree even if
/// the wall clock steps back.
fn insert_message(
    conn: &Connection,
    booking_id: Uuid,
    sender_id: Uuid,
    content: &str,
    is_system: bool,
) -> Result<Message> {
    let latest: Option<String> = conn.query_row(
        "SELECT MAX(created_at) FROM messages WHERE booking_id = ?1",
        [booking_id.to_string()],
        |row| row.get(0),
    )?;

    let now = Utc::now();
    let created_at = match latest.as_deref().map(parse_ts) {
        Some(Ok(prev)) if prev > now => prev,
        _ => now,
    };

    let message = Message {
        id: Uuid::new_v4(),
        booking_id,
        sender_id,
        content: content.to_string(),
        is_system,
        read_at: None,
        created_at,
    };

    conn.execute(
        "INSERT INTO messages (id, booking_id, sender_id, content, is_system, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            message.id.to_string(),
            booking_id.to_string(),
            sender_id.to_string(),
            message.content,
            is_system,
            ts(created_at),
        ],
    )?;

    Ok(message)
}

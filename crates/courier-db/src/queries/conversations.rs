use rusqlite::Row;
use tracing::warn;
use uuid::Uuid;

use courier_types::models::{
    Conversation, Counterpart, MessagePreview, ParticipantRole, RouteSummary,
};

use crate::models::{get_date, get_opt_uuid, get_parsed, get_ts, get_uuid};
use crate::{Database, Result};

/// Bookings visible in `?1`'s inbox: either side of the booking, from
/// `approved` onward.
const VISIBLE_BOOKINGS: &str = "(b.sender_id = ?1 OR a.traveler_id = ?1)
       AND b.status NOT IN ('pending', 'rejected', 'cancelled')";

impl Database {
    /// Inbox for `user_id`, most recent activity first. Conversations with no
    /// messages yet follow, newest booking first.
    pub fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>> {
        // Single pass: counterpart profile, latest message and unread count
        // are all resolved in SQL (no per-conversation round trips).
        let sql = format!(
            "SELECT b.id, b.sender_id, a.traveler_id, b.status, b.handoff_step, b.requested_kilos,
                    a.id, a.departure_city, a.arrival_city, a.departure_date, a.price_per_kg,
                    p.display_name, p.avatar_url,
                    lm.id, lm.sender_id, lm.content, lm.is_system, lm.created_at,
                    (SELECT COUNT(*) FROM messages u
                      WHERE u.booking_id = b.id AND u.sender_id != ?1 AND u.read_at IS NULL)
             FROM bookings b
             JOIN announcements a ON a.id = b.announcement_id
             LEFT JOIN profiles p
                ON p.id = CASE WHEN b.sender_id = ?1 THEN a.traveler_id ELSE b.sender_id END
             LEFT JOIN messages lm ON lm.rowid = (
                SELECT m.rowid FROM messages m
                WHERE m.booking_id = b.id
                ORDER BY m.created_at DESC, m.rowid DESC
                LIMIT 1)
             WHERE {VISIBLE_BOOKINGS}
             ORDER BY lm.created_at IS NULL, lm.created_at DESC, b.created_at DESC, b.id"
        );

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([user_id.to_string()], |row| conversation_from_row(row, user_id))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Badge total across every visible conversation in one aggregate query.
    /// Degrades to 0: the badge is best effort.
    pub fn unread_total(&self, user_id: Uuid) -> u64 {
        let sql = format!(
            "SELECT COUNT(*)
             FROM messages m
             JOIN bookings b ON b.id = m.booking_id
             JOIN announcements a ON a.id = b.announcement_id
             WHERE {VISIBLE_BOOKINGS}
               AND m.sender_id != ?1
               AND m.read_at IS NULL"
        );

        let result = self.with_conn(|conn| {
            let count: i64 = conn.query_row(&sql, [user_id.to_string()], |row| row.get(0))?;
            Ok(count)
        });

        match result {
            Ok(count) => count.max(0) as u64,
            Err(e) => {
                warn!("Unread total for {} unavailable: {}", user_id, e);
                0
            }
        }
    }
}

fn conversation_from_row(row: &Row<'_>, viewer: Uuid) -> rusqlite::Result<Conversation> {
    let sender_id = get_uuid(row, 1)?;
    let traveler_id = get_uuid(row, 2)?;
    let (role, counterpart_id) = if viewer == sender_id {
        (ParticipantRole::Sender, traveler_id)
    } else {
        (ParticipantRole::Traveler, sender_id)
    };

    let requested_kilos: f64 = row.get(5)?;
    let price_per_kg: f64 = row.get(10)?;

    let last_message = match get_opt_uuid(row, 13)? {
        Some(message_id) => Some(MessagePreview {
            message_id,
            sender_id: get_uuid(row, 14)?,
            content: row.get(15)?,
            is_system: row.get(16)?,
            created_at: get_ts(row, 17)?,
        }),
        None => None,
    };

    let unread: i64 = row.get(18)?;

    Ok(Conversation {
        booking_id: get_uuid(row, 0)?,
        role,
        status: get_parsed(row, 3)?,
        handoff_step: get_parsed(row, 4)?,
        requested_kilos,
        counterpart: Counterpart {
            user_id: counterpart_id,
            display_name: row.get(11)?,
            avatar_url: row.get(12)?,
        },
        route: RouteSummary {
            announcement_id: get_uuid(row, 6)?,
            departure_city: row.get(7)?,
            arrival_city: row.get(8)?,
            departure_date: get_date(row, 9)?,
            price_per_kg,
            total_price: requested_kilos * price_per_kg,
        },
        last_message,
        unread_count: unread.max(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::bookings::BookingDecision;
    use crate::test_support::Fixture;
    use courier_types::models::HandoffStep;

    #[test]
    fn pending_and_closed_bookings_have_no_conversation() {
        let fx = Fixture::pending();
        assert!(fx.db.list_conversations(fx.sender).unwrap().is_empty());

        let (_, rejected) = {
            let other = Uuid::new_v4();
            let b = fx.db.insert_booking(other, fx.announcement_id, 1.0).unwrap();
            fx.db
                .review_booking(b.id, fx.traveler, BookingDecision::Reject)
                .unwrap();
            (other, b.id)
        };
        let ids: Vec<Uuid> = fx
            .db
            .list_conversations(fx.traveler)
            .unwrap()
            .iter()
            .map(|c| c.booking_id)
            .collect();
        assert!(!ids.contains(&rejected));
        assert!(!ids.contains(&fx.booking_id));
    }

    #[test]
    fn fresh_conversation_has_empty_preview() {
        let fx = Fixture::approved();
        let inbox = fx.db.list_conversations(fx.sender).unwrap();
        assert_eq!(inbox.len(), 1);

        let conv = &inbox[0];
        assert_eq!(conv.booking_id, fx.booking_id);
        assert_eq!(conv.role, ParticipantRole::Sender);
        assert_eq!(conv.counterpart.user_id, fx.traveler);
        assert_eq!(conv.counterpart.display_name.as_deref(), Some("Traveler"));
        assert_eq!(conv.route.departure_city, "Paris");
        assert_eq!(conv.route.total_price, 24.0);
        assert_eq!(conv.handoff_step, HandoffStep::None);
        assert!(conv.last_message.is_none());
        assert_eq!(conv.unread_count, 0);
    }

    #[test]
    fn inbox_sorted_by_latest_activity_and_counts_unread() {
        let fx = Fixture::approved();
        let (other_sender, other_booking) = fx.second_booking();
        let (_, silent_booking) = fx.second_booking();

        fx.db.send_message(fx.booking_id, fx.sender, "first").unwrap();
        fx.db.send_message(fx.booking_id, fx.sender, "second").unwrap();
        fx.db.send_message(fx.booking_id, fx.sender, "third").unwrap();
        fx.db.send_message(other_booking, fx.traveler, "hello").unwrap();
        fx.db.send_message(other_booking, other_sender, "latest").unwrap();
        fx.db.mark_read(other_booking, fx.traveler).unwrap();

        let inbox = fx.db.list_conversations(fx.traveler).unwrap();
        let order: Vec<Uuid> = inbox.iter().map(|c| c.booking_id).collect();
        assert_eq!(order, vec![other_booking, fx.booking_id, silent_booking]);

        assert_eq!(inbox[0].last_message.as_ref().unwrap().content, "latest");
        assert_eq!(inbox[0].unread_count, 0);
        assert_eq!(inbox[1].unread_count, 3);
        assert_eq!(inbox[1].role, ParticipantRole::Traveler);
        assert!(inbox[2].last_message.is_none());

        assert_eq!(fx.db.unread_total(fx.traveler), 3);
        assert_eq!(fx.db.unread_total(other_sender), 0);
    }

    #[test]
    fn own_messages_never_count_as_unread() {
        let fx = Fixture::approved();
        fx.db.send_message(fx.booking_id, fx.sender, "one").unwrap();
        assert_eq!(fx.db.unread_total(fx.sender), 0);
        assert_eq!(fx.db.unread_total(fx.traveler), 1);
        assert_eq!(fx.db.unread_total(Uuid::new_v4()), 0);
    }
}

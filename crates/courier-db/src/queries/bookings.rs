//! Booking reads used by the core, plus the collaborator-side writes the core
//! depends on (announcement creation, booking request, approval, cancellation).

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use courier_types::models::{Booking, BookingStatus, ParticipantRole};

use super::OptionalExt;
use crate::models::{BOOKING_COLUMNS, booking_from_row, ts};
use crate::{CourierError, Database, Result};

pub struct NewAnnouncement<'a> {
    pub traveler_id: Uuid,
    pub departure_city: &'a str,
    pub arrival_city: &'a str,
    pub departure_date: NaiveDate,
    pub price_per_kg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingDecision {
    Approve,
    Reject,
}

impl Database {
    pub fn insert_announcement(&self, announcement: &NewAnnouncement<'_>) -> Result<Uuid> {
        if !announcement.price_per_kg.is_finite() || announcement.price_per_kg < 0.0 {
            return Err(CourierError::Validation(
                "price per kg must be a non-negative number".into(),
            ));
        }

        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO announcements
                    (id, traveler_id, departure_city, arrival_city, departure_date, price_per_kg, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    announcement.traveler_id.to_string(),
                    announcement.departure_city,
                    announcement.arrival_city,
                    announcement.departure_date.to_string(),
                    announcement.price_per_kg,
                    ts(Utc::now()),
                ],
            )?;
            Ok(id)
        })
    }

    /// A sender requests kilos on an announcement. Starts as `pending`.
    pub fn insert_booking(
        &self,
        sender_id: Uuid,
        announcement_id: Uuid,
        requested_kilos: f64,
    ) -> Result<Booking> {
        if !requested_kilos.is_finite() || requested_kilos <= 0.0 {
            return Err(CourierError::Validation(
                "requested kilos must be positive".into(),
            ));
        }

        let id = Uuid::new_v4();
        self.with_conn_mut(|conn| {
            let traveler: Option<String> = conn
                .query_row(
                    "SELECT traveler_id FROM announcements WHERE id = ?1",
                    [announcement_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let traveler =
                traveler.ok_or_else(|| CourierError::NotFound("announcement".into()))?;
            if traveler == sender_id.to_string() {
                return Err(CourierError::Validation(
                    "travelers cannot book their own announcement".into(),
                ));
            }

            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO bookings
                    (id, sender_id, announcement_id, requested_kilos, status, handoff_step, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 'none', ?5, ?5)",
                rusqlite::params![
                    id.to_string(),
                    sender_id.to_string(),
                    announcement_id.to_string(),
                    requested_kilos,
                    now,
                ],
            )?;

            query_booking(conn, id)?
                .ok_or_else(|| CourierError::storage_msg("booking vanished after insert"))
        })
    }

    /// Traveler approves or rejects a pending request.
    pub fn review_booking(
        &self,
        booking_id: Uuid,
        traveler_id: Uuid,
        decision: BookingDecision,
    ) -> Result<Booking> {
        let next = match decision {
            BookingDecision::Approve => BookingStatus::Approved,
            BookingDecision::Reject => BookingStatus::Rejected,
        };

        self.with_conn_mut(|conn| {
            let booking = load_participant_booking(conn, booking_id, traveler_id)?;
            if booking.role_of(traveler_id) != Some(ParticipantRole::Traveler) {
                return Err(CourierError::Validation(
                    "only the traveler can review a booking".into(),
                ));
            }

            let changed = conn.execute(
                "UPDATE bookings SET status = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'pending'",
                rusqlite::params![booking_id.to_string(), next.as_str(), ts(Utc::now())],
            )?;
            if changed == 0 {
                return Err(CourierError::Conflict(format!(
                    "booking is {} and can no longer be reviewed",
                    booking.status
                )));
            }

            info!("Booking {} reviewed: {}", booking_id, next);
            query_booking(conn, booking_id)?
                .ok_or_else(|| CourierError::NotFound("booking".into()))
        })
    }

    /// Sender withdraws a booking before any handoff step was taken.
    pub fn cancel_booking(&self, booking_id: Uuid, sender_id: Uuid) -> Result<Booking> {
        self.with_conn_mut(|conn| {
            let booking = load_participant_booking(conn, booking_id, sender_id)?;
            if booking.role_of(sender_id) != Some(ParticipantRole::Sender) {
                return Err(CourierError::Validation(
                    "only the sender can cancel a booking".into(),
                ));
            }

            let changed = conn.execute(
                "UPDATE bookings SET status = 'cancelled', updated_at = ?2
                 WHERE id = ?1 AND status IN ('pending', 'approved') AND handoff_step = 'none'",
                rusqlite::params![booking_id.to_string(), ts(Utc::now())],
            )?;
            if changed == 0 {
                return Err(CourierError::Conflict(
                    "booking can no longer be cancelled".into(),
                ));
            }

            info!("Booking {} cancelled by sender", booking_id);
            query_booking(conn, booking_id)?
                .ok_or_else(|| CourierError::NotFound("booking".into()))
        })
    }

    /// Booking as seen by one of its participants.
    pub fn get_booking(&self, booking_id: Uuid, viewer_id: Uuid) -> Result<Booking> {
        self.with_conn(|conn| {
            load_participant_booking(conn, booking_id, viewer_id)
                .map(|b| b.redacted_for(viewer_id))
        })
    }
}

pub(crate) fn query_booking(conn: &Connection, booking_id: Uuid) -> Result<Option<Booking>> {
    let sql = format!(
        "SELECT {BOOKING_COLUMNS}
         FROM bookings b
         JOIN announcements a ON a.id = b.announcement_id
         WHERE b.id = ?1"
    );
    conn.query_row(&sql, [booking_id.to_string()], booking_from_row)
        .optional()
}

/// Loads a booking on behalf of `user_id`. Bookings the user is not a party
/// to are reported exactly like missing ones.
pub(crate) fn load_participant_booking(
    conn: &Connection,
    booking_id: Uuid,
    user_id: Uuid,
) -> Result<Booking> {
    query_booking(conn, booking_id)?
        .filter(|b| b.role_of(user_id).is_some())
        .ok_or_else(|| CourierError::NotFound("booking".into()))
}

//! Handoff state machine: `none -> sender_confirmed -> handed_over -> delivered`.
//!
//! Each transition is one transaction holding a conditional UPDATE guarded on
//! the expected current step, plus the matching system message. A lost race
//! updates zero rows and is reported as a conflict, never a double advance.

use chrono::Utc;
use rusqlite::Connection;
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::models::{Booking, HandoffStep, Message, SystemMessageCode};

use super::bookings::{load_participant_booking, query_booking};
use super::messages::append_system_message;
use crate::code::{generate_delivery_code, normalize_code};
use crate::models::ts;
use crate::{CourierError, Database, Result};

/// Result of one applied transition.
#[derive(Debug, Clone)]
pub struct HandoffOutcome {
    pub booking: Booking,
    pub system_message: Message,
    /// Set only on the transition into `handed_over`.
    pub delivery_code: Option<String>,
}

impl Database {
    /// Explicit transition into `target` performed by `actor_id`.
    pub fn confirm_handoff(
        &self,
        booking_id: Uuid,
        actor_id: Uuid,
        target: HandoffStep,
    ) -> Result<HandoffOutcome> {
        let (expected, required_role, system_code) =
            match (target.previous(), target.actor(), target.system_code()) {
                (Some(expected), Some(role), Some(code)) => (expected, role, code),
                _ => {
                    return Err(CourierError::Validation(format!(
                        "'{}' is not a reachable handoff step",
                        target
                    )));
                }
            };

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let booking = load_participant_booking(&tx, booking_id, actor_id)?;
            if booking.role_of(actor_id) != Some(required_role) {
                return Err(CourierError::Validation(format!(
                    "'{}' must be confirmed by the {:?}",
                    target, required_role
                )));
            }
            if !booking.status.has_conversation() {
                return Err(CourierError::Conflict(format!(
                    "booking is {}, handoff is not open",
                    booking.status
                )));
            }
            if booking.handoff_step != expected {
                return Err(CourierError::Conflict(format!(
                    "handoff is at '{}', expected '{}'",
                    booking.handoff_step, expected
                )));
            }

            let code = (target == HandoffStep::HandedOver).then(generate_delivery_code);
            if !advance(&tx, booking_id, expected, target, code.as_deref())? {
                return Err(CourierError::Conflict(
                    "handoff state changed concurrently".into(),
                ));
            }

            let system_message = append_system_message(&tx, booking_id, actor_id, system_code)?;
            let booking = query_booking(&tx, booking_id)?
                .ok_or_else(|| CourierError::NotFound("booking".into()))?;
            tx.commit()?;

            info!(
                "Booking {} handoff {} -> {} by {}",
                booking_id, expected, target, actor_id
            );
            Ok(HandoffOutcome {
                booking,
                system_message,
                delivery_code: code,
            })
        })
    }

    /// Fail-closed delivery code check. `true` only when the booking is
    /// `handed_over` and the code matches, in which case the booking is now
    /// `delivered`. Every other case, storage failures included, is `false`
    /// with nothing written.
    pub fn validate_delivery_code(&self, booking_id: Uuid, submitted: &str, sender_id: Uuid) -> bool {
        match self.redeem_delivery_code(booking_id, submitted, sender_id) {
            Ok(outcome) => outcome.is_some(),
            Err(e) => {
                warn!("Delivery code check on {} failed closed: {}", booking_id, e);
                false
            }
        }
    }

    /// Atomic check-and-deliver behind [`Database::validate_delivery_code`].
    /// `Ok(None)` means the code was not accepted and nothing changed.
    pub fn redeem_delivery_code(
        &self,
        booking_id: Uuid,
        submitted: &str,
        sender_id: Uuid,
    ) -> Result<Option<HandoffOutcome>> {
        let normalized = normalize_code(submitted);
        if normalized.is_empty() {
            return Ok(None);
        }

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            let Some(booking) = query_booking(&tx, booking_id)? else {
                return Ok(None);
            };
            if booking.role_of(sender_id).is_none() {
                return Ok(None);
            }

            let changed = tx.execute(
                "UPDATE bookings
                 SET handoff_step = 'delivered', status = 'delivered', updated_at = ?3
                 WHERE id = ?1
                   AND handoff_step = 'handed_over'
                   AND delivery_code IS NOT NULL
                   AND UPPER(TRIM(delivery_code)) = ?2",
                rusqlite::params![booking_id.to_string(), normalized, ts(Utc::now())],
            )?;
            if changed == 0 {
                return Ok(None);
            }

            let system_message =
                append_system_message(&tx, booking_id, sender_id, SystemMessageCode::Delivered)?;
            let delivered = query_booking(&tx, booking_id)?
                .ok_or_else(|| CourierError::NotFound("booking".into()))?;
            tx.commit()?;

            info!("Booking {} delivered via delivery code", booking_id);
            Ok(Some(HandoffOutcome {
                booking: delivered,
                system_message,
                delivery_code: None,
            }))
        })
    }
}

/// Compare-and-swap on `handoff_step`. Returns false when another writer got there first.
fn advance(
    conn: &Connection,
    booking_id: Uuid,
    expected: HandoffStep,
    target: HandoffStep,
    code: Option<&str>,
) -> Result<bool> {
    let status = target.locked_status().map(|s| s.as_str());
    let changed = conn.execute(
        "UPDATE bookings
         SET handoff_step = ?3,
             status = COALESCE(?4, status),
             delivery_code = COALESCE(?5, delivery_code),
             updated_at = ?6
         WHERE id = ?1 AND handoff_step = ?2",
        rusqlite::params![
            booking_id.to_string(),
            expected.as_str(),
            target.as_str(),
            status,
            code,
            ts(Utc::now()),
        ],
    )?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use courier_types::models::BookingStatus;
    use std::sync::Arc;

    fn system_codes(fx: &Fixture) -> Vec<SystemMessageCode> {
        fx.db
            .list_messages(fx.booking_id, fx.sender)
            .unwrap()
            .iter()
            .filter_map(|m| m.system_code())
            .collect()
    }

    #[test]
    fn full_walk_with_explicit_delivery() {
        let fx = Fixture::approved();

        let out = fx
            .db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap();
        assert_eq!(out.booking.handoff_step, HandoffStep::SenderConfirmed);
        assert_eq!(out.booking.status, BookingStatus::Approved);
        assert!(out.delivery_code.is_none());
        assert!(out.system_message.is_system);

        let out = fx
            .db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::HandedOver)
            .unwrap();
        let code = out.delivery_code.clone().unwrap();
        assert_eq!(code.len(), 10);
        assert_eq!(out.booking.status, BookingStatus::HandedOver);
        assert_eq!(out.booking.delivery_code.as_deref(), Some(code.as_str()));

        let out = fx
            .db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::Delivered)
            .unwrap();
        assert_eq!(out.booking.status, BookingStatus::Delivered);
        assert_eq!(out.booking.handoff_step, HandoffStep::Delivered);

        assert_eq!(
            system_codes(&fx),
            vec![
                SystemMessageCode::SenderConfirmed,
                SystemMessageCode::HandedOver,
                SystemMessageCode::Delivered
            ]
        );
    }

    #[test]
    fn wrong_party_and_skips_are_rejected() {
        let fx = Fixture::approved();

        let err = fx
            .db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::SenderConfirmed)
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));

        let err = fx
            .db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::HandedOver)
            .unwrap_err();
        assert!(err.is_conflict());

        let err = fx
            .db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::None)
            .unwrap_err();
        assert!(matches!(err, CourierError::Validation(_)));

        let err = fx
            .db
            .confirm_handoff(fx.booking_id, Uuid::new_v4(), HandoffStep::SenderConfirmed)
            .unwrap_err();
        assert!(matches!(err, CourierError::NotFound(_)));

        assert!(system_codes(&fx).is_empty());
    }

    #[test]
    fn repeating_a_step_is_a_conflict() {
        let fx = Fixture::approved();
        fx.db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap();
        let err = fx
            .db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(system_codes(&fx).len(), 1);
    }

    #[test]
    fn pending_bookings_have_no_handoff() {
        let fx = Fixture::pending();
        let err = fx
            .db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn concurrent_advances_apply_once() {
        let fx = Fixture::approved();
        let db = Arc::new(fx.db);
        let (booking_id, sender) = (fx.booking_id, fx.sender);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || {
                    db.confirm_handoff(booking_id, sender, HandoffStep::SenderConfirmed)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.is_conflict()));

        let system = db
            .list_messages(booking_id, sender)
            .unwrap()
            .into_iter()
            .filter(|m| m.is_system)
            .count();
        assert_eq!(system, 1);
    }

    #[test]
    fn outcome_is_the_committed_step_even_when_overtaken() {
        let fx = Fixture::approved();
        fx.db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap();
        let db = Arc::new(fx.db);
        let (booking_id, traveler) = (fx.booking_id, fx.traveler);

        // keeps trying to deliver, so it lands right after the handover commits
        let chaser = {
            let db = db.clone();
            std::thread::spawn(move || {
                for _ in 0..100_000 {
                    if db.confirm_handoff(booking_id, traveler, HandoffStep::Delivered).is_ok() {
                        return true;
                    }
                    std::thread::yield_now();
                }
                false
            })
        };

        let out = db
            .confirm_handoff(booking_id, traveler, HandoffStep::HandedOver)
            .unwrap();
        assert_eq!(out.booking.handoff_step, HandoffStep::HandedOver);
        assert_eq!(out.booking.status, BookingStatus::HandedOver);
        assert_eq!(out.booking.delivery_code, out.delivery_code);

        assert!(chaser.join().unwrap());
        let latest = db.get_booking(booking_id, traveler).unwrap();
        assert_eq!(latest.handoff_step, HandoffStep::Delivered);
    }

    #[test]
    fn code_check_fails_closed_without_mutation() {
        // correct code, wrong step
        let (fx, code) = Fixture::handed_over();
        fx.db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::Delivered)
            .unwrap();
        let before = fx.db.list_messages(fx.booking_id, fx.sender).unwrap();
        assert!(!fx.db.validate_delivery_code(fx.booking_id, &code, fx.sender));
        assert_eq!(fx.db.list_messages(fx.booking_id, fx.sender).unwrap(), before);

        // wrong code, right step
        let (fx, code) = Fixture::handed_over();
        let wrong = if code == "AAAAAAAAAA" { "BBBBBBBBBB" } else { "AAAAAAAAAA" };
        let before = fx.db.list_messages(fx.booking_id, fx.sender).unwrap();
        assert!(!fx.db.validate_delivery_code(fx.booking_id, wrong, fx.sender));
        assert!(!fx.db.validate_delivery_code(fx.booking_id, "", fx.sender));
        let booking = fx.db.get_booking(fx.booking_id, fx.traveler).unwrap();
        assert_eq!(booking.handoff_step, HandoffStep::HandedOver);
        assert_eq!(fx.db.list_messages(fx.booking_id, fx.sender).unwrap(), before);

        // nonexistent booking
        assert!(!fx.db.validate_delivery_code(Uuid::new_v4(), &code, fx.sender));

        // outsider holding the right code
        assert!(!fx.db.validate_delivery_code(fx.booking_id, &code, Uuid::new_v4()));
        assert_eq!(fx.db.list_messages(fx.booking_id, fx.sender).unwrap(), before);
    }

    #[test]
    fn racing_correct_codes_deliver_once() {
        let (fx, code) = Fixture::handed_over();
        let db = Arc::new(fx.db);
        let (booking_id, sender) = (fx.booking_id, fx.sender);

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let db = db.clone();
                let code = code.clone();
                std::thread::spawn(move || db.validate_delivery_code(booking_id, &code, sender))
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);

        let delivered = db
            .list_messages(booking_id, sender)
            .unwrap()
            .iter()
            .filter(|m| m.system_code() == Some(SystemMessageCode::Delivered))
            .count();
        assert_eq!(delivered, 1);
    }
}

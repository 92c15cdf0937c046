use chrono::NaiveDate;
use tempfile::TempDir;
use uuid::Uuid;

use courier_types::models::HandoffStep;

use crate::Database;
use crate::queries::bookings::{BookingDecision, NewAnnouncement};

/// One traveler announcement with one booking from one sender, on a fresh
/// on-disk database.
pub(crate) struct Fixture {
    pub db: Database,
    pub sender: Uuid,
    pub traveler: Uuid,
    pub announcement_id: Uuid,
    pub booking_id: Uuid,
    _dir: TempDir,
}

impl Fixture {
    pub fn pending() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("test.db")).unwrap();

        let sender = Uuid::new_v4();
        let traveler = Uuid::new_v4();
        db.upsert_profile(sender, Some("Sender"), None).unwrap();
        db.upsert_profile(traveler, Some("Traveler"), None).unwrap();

        let announcement_id = db
            .insert_announcement(&NewAnnouncement {
                traveler_id: traveler,
                departure_city: "Paris",
                arrival_city: "Dakar",
                departure_date: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
                price_per_kg: 8.0,
            })
            .unwrap();
        let booking = db.insert_booking(sender, announcement_id, 3.0).unwrap();

        Self {
            db,
            sender,
            traveler,
            announcement_id,
            booking_id: booking.id,
            _dir: dir,
        }
    }

    pub fn approved() -> Self {
        let fx = Self::pending();
        fx.db
            .review_booking(fx.booking_id, fx.traveler, BookingDecision::Approve)
            .unwrap();
        fx
    }

    /// Approved booking walked up to `handed_over`. Returns the delivery code.
    pub fn handed_over() -> (Self, String) {
        let fx = Self::approved();
        fx.db
            .confirm_handoff(fx.booking_id, fx.sender, HandoffStep::SenderConfirmed)
            .unwrap();
        let outcome = fx
            .db
            .confirm_handoff(fx.booking_id, fx.traveler, HandoffStep::HandedOver)
            .unwrap();
        let code = outcome.delivery_code.unwrap();
        (fx, code)
    }

    /// Another approved booking on the same announcement from a new sender.
    pub fn second_booking(&self) -> (Uuid, Uuid) {
        let sender = Uuid::new_v4();
        let booking = self
            .db
            .insert_booking(sender, self.announcement_id, 1.5)
            .unwrap();
        self.db
            .review_booking(booking.id, self.traveler, BookingDecision::Approve)
            .unwrap();
        (sender, booking.id)
    }
}

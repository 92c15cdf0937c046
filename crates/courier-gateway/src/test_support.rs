use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;
use uuid::Uuid;

use courier_db::Database;
use courier_db::queries::bookings::{BookingDecision, NewAnnouncement};

use crate::dispatcher::Dispatcher;

/// Fresh database with one approved booking, plus an empty dispatcher.
pub(crate) struct Setup {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub sender: Uuid,
    pub traveler: Uuid,
    pub booking_id: Uuid,
    _dir: TempDir,
}

pub(crate) fn setup() -> Setup {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("courier.db")).unwrap();
    let sender = Uuid::new_v4();
    let traveler = Uuid::new_v4();
    let announcement = db
        .insert_announcement(&NewAnnouncement {
            traveler_id: traveler,
            departure_city: "Paris",
            arrival_city: "Dakar",
            departure_date: NaiveDate::from_ymd_opt(2026, 11, 20).unwrap(),
            price_per_kg: 8.0,
        })
        .unwrap();
    let booking = db.insert_booking(sender, announcement, 3.0).unwrap();
    db.review_booking(booking.id, traveler, BookingDecision::Approve)
        .unwrap();

    Setup {
        db: Arc::new(db),
        dispatcher: Dispatcher::new(),
        sender,
        traveler,
        booking_id: booking.id,
        _dir: dir,
    }
}

use std::sync::Arc;

use axum::Extension;
use chrono::NaiveDate;
use tempfile::TempDir;
use uuid::Uuid;

use courier_db::Database;
use courier_db::queries::bookings::{BookingDecision, NewAnnouncement};
use courier_gateway::dispatcher::Dispatcher;
use courier_types::api::Claims;

use crate::state::{AppState, AppStateInner};

/// App state over a fresh database holding one approved booking.
pub(crate) struct TestApp {
    pub state: AppState,
    pub sender: Uuid,
    pub traveler: Uuid,
    pub booking_id: Uuid,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("api.db")).unwrap();

        let sender = Uuid::new_v4();
        let traveler = Uuid::new_v4();
        db.upsert_profile(traveler, Some("Awa"), None).unwrap();
        let announcement = db
            .insert_announcement(&NewAnnouncement {
                traveler_id: traveler,
                departure_city: "Bordeaux",
                arrival_city: "Douala",
                departure_date: NaiveDate::from_ymd_opt(2026, 12, 12).unwrap(),
                price_per_kg: 9.0,
            })
            .unwrap();
        let booking = db.insert_booking(sender, announcement, 2.0).unwrap();
        db.review_booking(booking.id, traveler, BookingDecision::Approve)
            .unwrap();

        let state = Arc::new(AppStateInner {
            db: Arc::new(db),
            dispatcher: Dispatcher::new(),
            jwt_secret: "test-secret".into(),
        });

        Self {
            state,
            sender,
            traveler,
            booking_id: booking.id,
            _dir: dir,
        }
    }

    pub fn claims(user: Uuid) -> Extension<Claims> {
        Extension(Claims {
            sub: user,
            exp: usize::MAX,
        })
    }
}

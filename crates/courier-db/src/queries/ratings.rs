use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use courier_types::models::{Rating, RatingSummary};

use super::OptionalExt;
use super::bookings::load_participant_booking;
use crate::error::is_unique_violation;
use crate::models::{RATING_COLUMNS, rating_from_row, ts};
use crate::{CourierError, Database, Result};

impl Database {
    /// One rating per `(booking, rater)`. The UNIQUE constraint decides
    /// duplicates, so retried or concurrent submissions cannot both land.
    ///
    /// Delivery is not checked here: the chat UI only offers rating once it
    /// has observed `delivered`.
    pub fn submit_rating(
        &self,
        booking_id: Uuid,
        rater_id: Uuid,
        rated_id: Uuid,
        score: i64,
        comment: Option<&str>,
    ) -> Result<Rating> {
        if !(1..=5).contains(&score) {
            return Err(CourierError::Validation(format!(
                "score must be between 1 and 5, got {}",
                score
            )));
        }
        let comment = comment.map(str::trim).filter(|c| !c.is_empty());

        self.with_conn_mut(|conn| {
            let booking = load_participant_booking(conn, booking_id, rater_id)?;
            if booking.counterpart_of(rater_id) != Some(rated_id) {
                return Err(CourierError::Validation(
                    "ratings go to the other party of the booking".into(),
                ));
            }

            let rating = Rating {
                id: Uuid::new_v4(),
                booking_id,
                rater_id,
                rated_id,
                score: score as u8,
                comment: comment.map(str::to_string),
                created_at: Utc::now(),
            };

            let inserted = conn.execute(
                "INSERT INTO ratings (id, booking_id, rater_id, rated_id, score, comment, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    rating.id.to_string(),
                    booking_id.to_string(),
                    rater_id.to_string(),
                    rated_id.to_string(),
                    rating.score,
                    rating.comment,
                    ts(rating.created_at),
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(CourierError::Conflict(
                        "booking already rated by this user".into(),
                    ));
                }
                Err(e) => return Err(e.into()),
            }

            info!("{} rated {} {} on booking {}", rater_id, rated_id, score, booking_id);
            Ok(rating)
        })
    }

    /// Mean score received by `user_id`. `{0, 0}` when unrated or unavailable.
    pub fn average_rating(&self, user_id: Uuid) -> RatingSummary {
        let result = self.with_conn(|conn| {
            let (average, count): (Option<f64>, i64) = conn.query_row(
                "SELECT AVG(score), COUNT(*) FROM ratings WHERE rated_id = ?1",
                [user_id.to_string()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            Ok(match average {
                Some(average) if count > 0 => RatingSummary {
                    average,
                    count: count as u32,
                },
                _ => RatingSummary::EMPTY,
            })
        });

        result.unwrap_or_else(|e| {
            warn!("Rating summary for {} unavailable: {}", user_id, e);
            RatingSummary::EMPTY
        })
    }

    /// The rating `rater_id` left on a booking, if any. Lookup failures read
    /// as "not rated yet".
    pub fn rating_for_booking(&self, booking_id: Uuid, rater_id: Uuid) -> Option<Rating> {
        let sql = format!("SELECT {RATING_COLUMNS} FROM ratings WHERE booking_id = ?1 AND rater_id = ?2");
        let result = self.with_conn(|conn| {
            conn.query_row(
                &sql,
                [booking_id.to_string(), rater_id.to_string()],
                rating_from_row,
            )
            .optional()
        });

        result.unwrap_or_else(|e| {
            warn!("Rating lookup for booking {} unavailable: {}", booking_id, e);
            None
        })
    }
}

use rusqlite::Connection;
use tracing::info;

use crate::Result;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (bookings, messages, ratings)");
        conn.execute_batch(
            "
            BEGIN;

            -- Read-only mirror of the identity provider's profile data
            CREATE TABLE profiles (
                id            TEXT PRIMARY KEY,
                display_name  TEXT,
                avatar_url    TEXT,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE announcements (
                id              TEXT PRIMARY KEY,
                traveler_id     TEXT NOT NULL,
                departure_city  TEXT NOT NULL,
                arrival_city    TEXT NOT NULL,
                departure_date  TEXT NOT NULL,
                price_per_kg    REAL NOT NULL CHECK (price_per_kg >= 0),
                created_at      TEXT NOT NULL
            );

            CREATE INDEX idx_announcements_traveler
                ON announcements(traveler_id);

            CREATE TABLE bookings (
                id               TEXT PRIMARY KEY,
                sender_id        TEXT NOT NULL,
                announcement_id  TEXT NOT NULL REFERENCES announcements(id),
                requested_kilos  REAL NOT NULL CHECK (requested_kilos > 0),
                status           TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'approved', 'rejected', 'cancelled', 'handed_over', 'delivered')),
                handoff_step     TEXT NOT NULL DEFAULT 'none'
                    CHECK (handoff_step IN ('none', 'sender_confirmed', 'handed_over', 'delivered')),
                delivery_code    TEXT,
                created_at       TEXT NOT NULL,
                updated_at       TEXT NOT NULL,
                CHECK (handoff_step != 'handed_over' OR status = 'handed_over'),
                CHECK (handoff_step != 'delivered' OR status = 'delivered')
            );

            CREATE INDEX idx_bookings_sender ON bookings(sender_id);
            CREATE INDEX idx_bookings_announcement ON bookings(announcement_id);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                booking_id  TEXT NOT NULL REFERENCES bookings(id),
                sender_id   TEXT NOT NULL,
                content     TEXT NOT NULL CHECK (length(content) BETWEEN 1 AND 2000),
                is_system   INTEGER NOT NULL DEFAULT 0,
                read_at     TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_booking
                ON messages(booking_id, created_at);

            CREATE INDEX idx_messages_unread
                ON messages(booking_id, sender_id) WHERE read_at IS NULL;

            CREATE TABLE ratings (
                id          TEXT PRIMARY KEY,
                booking_id  TEXT NOT NULL REFERENCES bookings(id),
                rater_id    TEXT NOT NULL,
                rated_id    TEXT NOT NULL,
                score       INTEGER NOT NULL CHECK (score BETWEEN 1 AND 5),
                comment     TEXT,
                created_at  TEXT NOT NULL,
                UNIQUE(booking_id, rater_id)
            );

            CREATE INDEX idx_ratings_rated ON ratings(rated_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

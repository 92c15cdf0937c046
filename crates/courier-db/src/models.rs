//! Row mapping between SQLite columns and courier-types models.
//!
//! Ids are stored as UUID strings, timestamps as RFC 3339 UTC strings with
//! microsecond precision so that lexical order equals time order.

use std::error::Error;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;
use uuid::Uuid;

use courier_types::models::{Booking, Message, Rating};

pub(crate) fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn get_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn get_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_ts(&raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn get_opt_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

pub(crate) fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn get_parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_err(idx, e))
}

/// Bookings are always read joined to their announcement (alias `a`) for the traveler id.
pub(crate) const BOOKING_COLUMNS: &str = "b.id, b.sender_id, a.traveler_id, b.announcement_id, \
     b.requested_kilos, b.status, b.handoff_step, b.delivery_code, b.created_at, b.updated_at";

pub(crate) fn booking_from_row(row: &Row<'_>) -> rusqlite::Result<Booking> {
    Ok(Booking {
        id: get_uuid(row, 0)?,
        sender_id: get_uuid(row, 1)?,
        traveler_id: get_uuid(row, 2)?,
        announcement_id: get_uuid(row, 3)?,
        requested_kilos: row.get(4)?,
        status: get_parsed(row, 5)?,
        handoff_step: get_parsed(row, 6)?,
        delivery_code: row.get(7)?,
        created_at: get_ts(row, 8)?,
        updated_at: get_ts(row, 9)?,
    })
}

pub(crate) const MESSAGE_COLUMNS: &str =
    "id, booking_id, sender_id, content, is_system, read_at, created_at";

pub(crate) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: get_uuid(row, 0)?,
        booking_id: get_uuid(row, 1)?,
        sender_id: get_uuid(row, 2)?,
        content: row.get(3)?,
        is_system: row.get(4)?,
        read_at: get_opt_ts(row, 5)?,
        created_at: get_ts(row, 6)?,
    })
}

pub(crate) const RATING_COLUMNS: &str =
    "id, booking_id, rater_id, rated_id, score, comment, created_at";

pub(crate) fn rating_from_row(row: &Row<'_>) -> rusqlite::Result<Rating> {
    Ok(Rating {
        id: get_uuid(row, 0)?,
        booking_id: get_uuid(row, 1)?,
        rater_id: get_uuid(row, 2)?,
        rated_id: get_uuid(row, 3)?,
        score: row.get(4)?,
        comment: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

pub mod bookings;
pub mod conversations;
pub mod handoff;
pub mod messages;
pub mod profiles;
pub mod ratings;

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> crate::Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> crate::Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

use chrono::Utc;
use uuid::Uuid;

use courier_types::models::Counterpart;

use super::OptionalExt;
use crate::models::ts;
use crate::{Database, Result};

impl Database {
    /// Mirror display fields pushed by the identity provider.
    pub fn upsert_profile(
        &self,
        user_id: Uuid,
        display_name: Option<&str>,
        avatar_url: Option<&str>,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO profiles (id, display_name, avatar_url, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    avatar_url = excluded.avatar_url,
                    updated_at = excluded.updated_at",
                rusqlite::params![user_id.to_string(), display_name, avatar_url, ts(Utc::now())],
            )?;
            Ok(())
        })
    }

    /// Display identity for a user. Unknown users resolve to empty fields.
    pub fn get_profile(&self, user_id: Uuid) -> Result<Counterpart> {
        self.with_conn(|conn| {
            let fields: Option<(Option<String>, Option<String>)> = conn
                .query_row(
                    "SELECT display_name, avatar_url FROM profiles WHERE id = ?1",
                    [user_id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (display_name, avatar_url) = fields.unwrap_or_default();
            Ok(Counterpart {
                user_id,
                display_name,
                avatar_url,
            })
        })
    }
}

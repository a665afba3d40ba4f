use rusqlite::{params, Connection};
use serde::Deserialize;

use crate::{error::Result, ingest::get_or_create_user};

/// Directory data about a user, filled in from outside the log pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub is_alumni: bool,
}

/// Overwrites the profile fields of `username`, creating the user if it was never seen in a log.
pub fn update_user_profile(conn: &Connection, username: &str, profile: &ProfileUpdate) -> Result<i64> {
    let user_id = get_or_create_user(conn, username, None, None)?;
    conn.execute(
        "UPDATE Users SET full_name = ?1, title = ?2, image_url = ?3, is_alumni = ?4 WHERE user_id = ?5",
        params![profile.full_name, profile.title, profile.image_url, profile.is_alumni, user_id],
    )?;
    Ok(user_id)
}

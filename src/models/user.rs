// src/models/user.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'users' table in the database.
///
/// Deliberately minimal: the challenge engine only needs identity and the
/// cumulative points total it increments at finalization.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub points: i64,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

// src/models/challenge.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::models::{progress::ProgressEntry, vote::Vote};

/// Challenge lifecycle states.
pub mod status {
    pub const PENDING: &str = "pending";
    pub const IN_PROGRESS: &str = "in-progress";
    pub const COMPLETED: &str = "completed";
    pub const CANCELLED: &str = "cancelled";

    pub const ALL: [&str; 4] = [PENDING, IN_PROGRESS, COMPLETED, CANCELLED];
}

/// How the challenge's scoring was decided: 'auto' (completion order only),
/// 'vote' (at least one active vote), or 'admin'.
pub mod evaluation {
    pub const AUTO: &str = "auto";
    pub const VOTE: &str = "vote";
    pub const ADMIN: &str = "admin";
}

/// Represents the 'challenges' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Challenge {
    pub id: i64,
    pub creator_id: i64,
    pub title: String,
    pub description: String,
    pub due_date: chrono::DateTime<chrono::Utc>,

    /// Base points for completing (1..=100).
    pub points: i32,
    /// Extra points for the first finisher (0..=100).
    pub bonus_points: i32,

    pub status: String,
    pub evaluation_method: String,
    pub winner_id: Option<i64>,

    pub is_private: bool,
    /// Present iff `is_private`.
    pub invite_code: Option<String>,

    pub is_deleted: bool,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

/// List item with the creator's username joined in.
#[derive(Debug, Serialize, FromRow)]
pub struct ChallengeSummary {
    pub id: i64,
    pub creator_id: i64,
    pub creator_username: String,
    pub title: String,
    pub description: String,
    pub due_date: chrono::DateTime<chrono::Utc>,
    pub points: i32,
    pub bonus_points: i32,
    pub status: String,
    pub evaluation_method: String,
    pub winner_id: Option<i64>,
    pub is_private: bool,
    pub participant_count: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A participant row joined with the user's name.
#[derive(Debug, Serialize, FromRow)]
pub struct Participant {
    pub user_id: i64,
    pub username: String,
    pub joined_at: chrono::DateTime<chrono::Utc>,
}

/// Full challenge detail: the aggregate a single GET returns.
#[derive(Debug, Serialize)]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub participants: Vec<Participant>,
    pub user_progress: Vec<ProgressEntry>,
    pub votes: Vec<Vote>,
}

/// DTO for creating a new challenge.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateChallengeRequest {
    #[validate(length(min = 1, max = 120, message = "Title length must be between 1 and 120 chars"))]
    pub title: String,

    #[validate(length(max = 5000, message = "Description must be at most 5000 chars"))]
    pub description: Option<String>,

    pub due_date: chrono::DateTime<chrono::Utc>,

    #[validate(range(min = 1, max = 100, message = "points must be between 1 and 100"))]
    pub points: Option<i32>,

    #[validate(range(min = 0, max = 100, message = "bonus_points must be between 0 and 100"))]
    pub bonus_points: Option<i32>,

    #[serde(default)]
    pub is_private: bool,
}

/// DTO for updating a challenge. Absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateChallengeRequest {
    #[validate(length(min = 1, max = 120, message = "Title length must be between 1 and 120 chars"))]
    pub title: Option<String>,

    #[validate(length(max = 5000, message = "Description must be at most 5000 chars"))]
    pub description: Option<String>,

    pub due_date: Option<chrono::DateTime<chrono::Utc>>,

    #[validate(range(min = 1, max = 100, message = "points must be between 1 and 100"))]
    pub points: Option<i32>,

    #[validate(range(min = 0, max = 100, message = "bonus_points must be between 0 and 100"))]
    pub bonus_points: Option<i32>,

    pub status: Option<String>,
}

/// Query parameters for joining a challenge. The invite code is required
/// only for private challenges.
#[derive(Debug, Deserialize)]
pub struct JoinChallengeRequest {
    pub invite_code: Option<String>,
}

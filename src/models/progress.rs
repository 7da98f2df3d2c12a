// src/models/progress.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A participant's single submission record within a challenge.
/// One row per (challenge, user); the primary key carries the invariant.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub user_id: i64,
    pub completed: bool,
    /// Set exactly once, on the first transition to completed.
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub points_earned: i32,
    pub submission_link: String,
    pub notes: String,
    pub file_url: Option<String>,
    #[serde(skip_serializing)]
    pub file_id: Option<String>,
}

/// Optional attachment carried inline in the request body.
#[derive(Debug, Deserialize)]
pub struct FileAttachment {
    pub file_name: String,
    /// Base64-encoded file content.
    pub content_base64: String,
}

/// DTO for submitting progress the first time.
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitProgressRequest {
    #[serde(default)]
    pub completed: bool,

    #[validate(length(max = 2048, message = "submission_link must be at most 2048 chars"))]
    pub submission_link: Option<String>,

    #[validate(length(max = 2000, message = "notes must be at most 2000 chars"))]
    pub notes: Option<String>,

    pub file: Option<FileAttachment>,
}

/// DTO for updating existing progress. Absent fields are left unchanged;
/// `completed` only ever flips false -> true here (un-completing is done by
/// removing the entry).
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProgressRequest {
    pub completed: Option<bool>,

    #[validate(length(max = 2048, message = "submission_link must be at most 2048 chars"))]
    pub submission_link: Option<String>,

    #[validate(length(max = 2000, message = "notes must be at most 2000 chars"))]
    pub notes: Option<String>,

    pub file: Option<FileAttachment>,
}

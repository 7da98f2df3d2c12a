// src/models/vote.rs

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// An active vote: at most one per voter per challenge (primary key).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: i64,
    pub voted_for_id: i64,
}

/// DTO for casting (or toggling) a vote.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub voted_for_id: i64,
}

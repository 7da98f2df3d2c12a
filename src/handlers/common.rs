// src/handlers/common.rs
//
// Shared pieces of the atomic load-modify-store cycle. Every mutating
// operation locks the challenge row first; the lock is the per-challenge
// unit of mutual exclusion, so two requests racing on the same challenge
// serialize here instead of losing updates.

use sqlx::{FromRow, Postgres, Transaction};

use crate::{
    error::AppError,
    models::challenge::{Challenge, evaluation},
};

/// The challenge columns mutating handlers decide on, fetched under
/// `FOR UPDATE`. Soft-deleted challenges are invisible here.
#[derive(Debug, FromRow)]
pub struct LockedChallenge {
    pub id: i64,
    pub creator_id: i64,
    pub status: String,
    pub points: i32,
    pub bonus_points: i32,
    pub is_private: bool,
    pub invite_code: Option<String>,
}

pub async fn lock_challenge(
    tx: &mut Transaction<'_, Postgres>,
    challenge_id: i64,
) -> Result<LockedChallenge, AppError> {
    sqlx::query_as::<_, LockedChallenge>(
        r#"
        SELECT id, creator_id, status, points, bonus_points, is_private, invite_code
        FROM challenges
        WHERE id = $1 AND NOT is_deleted
        FOR UPDATE
        "#,
    )
    .bind(challenge_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(AppError::NotFound("Challenge not found".to_string()))
}

pub async fn is_participant(
    tx: &mut Transaction<'_, Postgres>,
    challenge_id: i64,
    user_id: i64,
) -> Result<bool, AppError> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM challenge_participants WHERE challenge_id = $1 AND user_id = $2)",
    )
    .bind(challenge_id)
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(exists)
}

/// Recomputes evaluation_method from the active vote count: 'vote' while any
/// vote stands, 'auto' otherwise.
pub async fn refresh_evaluation_method(
    tx: &mut Transaction<'_, Postgres>,
    challenge_id: i64,
) -> Result<(), AppError> {
    let votes: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM challenge_votes WHERE challenge_id = $1")
            .bind(challenge_id)
            .fetch_one(&mut **tx)
            .await?;

    let method = if votes > 0 {
        evaluation::VOTE
    } else {
        evaluation::AUTO
    };

    sqlx::query("UPDATE challenges SET evaluation_method = $2, updated_at = now() WHERE id = $1")
        .bind(challenge_id)
        .bind(method)
        .execute(&mut **tx)
        .await?;

    Ok(())
}

/// Reloads the full challenge row, e.g. to echo the updated state back.
pub async fn fetch_challenge(
    tx: &mut Transaction<'_, Postgres>,
    challenge_id: i64,
) -> Result<Challenge, AppError> {
    sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = $1")
        .bind(challenge_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("Challenge not found".to_string()))
}

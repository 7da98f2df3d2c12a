// src/handlers/challenge.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use sqlx::PgPool;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        challenge::{
            Challenge, ChallengeDetail, ChallengeSummary, CreateChallengeRequest, Participant,
            UpdateChallengeRequest, status,
        },
        progress::ProgressEntry,
        vote::Vote,
    },
    storage::DynObjectStore,
    utils::auth::Claims,
};

use super::common;

const DEFAULT_POINTS: i32 = 10;
const DEFAULT_BONUS_POINTS: i32 = 1;
const INVITE_CODE_LEN: usize = 8;

fn generate_invite_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(char::from)
        .collect()
}

/// Create a new challenge. The creator automatically joins.
pub async fn create_challenge(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if payload.due_date <= Utc::now() {
        return Err(AppError::BadRequest(
            "Due date cannot be in the past".to_string(),
        ));
    }

    let creator_id = claims.user_id()?;
    let invite_code = payload.is_private.then(generate_invite_code);

    let mut tx = pool.begin().await?;

    let challenge = sqlx::query_as::<_, Challenge>(
        r#"
        INSERT INTO challenges
            (creator_id, title, description, due_date, points, bonus_points, is_private, invite_code)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(creator_id)
    .bind(payload.title.trim())
    .bind(payload.description.as_deref().unwrap_or("").trim())
    .bind(payload.due_date)
    .bind(payload.points.unwrap_or(DEFAULT_POINTS))
    .bind(payload.bonus_points.unwrap_or(DEFAULT_BONUS_POINTS))
    .bind(payload.is_private)
    .bind(invite_code)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        tracing::error!("Failed to create challenge: {:?}", e);
        AppError::from(e)
    })?;

    sqlx::query("INSERT INTO challenge_participants (challenge_id, user_id) VALUES ($1, $2)")
        .bind(challenge.id)
        .bind(creator_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(challenge)))
}

/// List all visible challenges, newest first.
pub async fn list_challenges(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let challenges = sqlx::query_as::<_, ChallengeSummary>(
        r#"
        SELECT
            c.id, c.creator_id, u.username AS creator_username,
            c.title, c.description, c.due_date, c.points, c.bonus_points,
            c.status, c.evaluation_method, c.winner_id, c.is_private,
            (SELECT COUNT(*) FROM challenge_participants p WHERE p.challenge_id = c.id)
                AS participant_count,
            c.created_at
        FROM challenges c
        JOIN users u ON c.creator_id = u.id
        WHERE NOT c.is_deleted
        ORDER BY c.created_at DESC
        "#,
    )
    .fetch_all(&pool)
    .await
    .map_err(|e| {
        tracing::error!("Failed to list challenges: {:?}", e);
        AppError::from(e)
    })?;

    Ok(Json(challenges))
}

/// Get one challenge with its participants, progress entries and votes.
pub async fn get_challenge(
    State(pool): State<PgPool>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let challenge =
        sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Challenge not found".to_string()))?;

    let participants = sqlx::query_as::<_, Participant>(
        r#"
        SELECT p.user_id, u.username, p.joined_at
        FROM challenge_participants p
        JOIN users u ON p.user_id = u.id
        WHERE p.challenge_id = $1
        ORDER BY p.joined_at
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let user_progress = sqlx::query_as::<_, ProgressEntry>(
        r#"
        SELECT user_id, completed, completed_at, points_earned,
               submission_link, notes, file_url, file_id
        FROM challenge_progress
        WHERE challenge_id = $1
        "#,
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    let votes = sqlx::query_as::<_, Vote>(
        "SELECT voter_id, voted_for_id FROM challenge_votes WHERE challenge_id = $1",
    )
    .bind(id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(ChallengeDetail {
        challenge,
        participants,
        user_progress,
        votes,
    }))
}

/// List challenges the caller participates in.
pub async fn my_participating_challenges(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let challenges = sqlx::query_as::<_, ChallengeSummary>(
        r#"
        SELECT
            c.id, c.creator_id, u.username AS creator_username,
            c.title, c.description, c.due_date, c.points, c.bonus_points,
            c.status, c.evaluation_method, c.winner_id, c.is_private,
            (SELECT COUNT(*) FROM challenge_participants p WHERE p.challenge_id = c.id)
                AS participant_count,
            c.created_at
        FROM challenges c
        JOIN users u ON c.creator_id = u.id
        JOIN challenge_participants me ON me.challenge_id = c.id AND me.user_id = $1
        WHERE NOT c.is_deleted
        ORDER BY c.due_date DESC
        "#,
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(challenges))
}

/// Update challenge metadata. Creator only; absent fields stay unchanged,
/// the due date is re-validated as a future date.
pub async fn update_challenge(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;

    if locked.creator_id != user_id {
        return Err(AppError::Forbidden(
            "Only the creator can update this challenge".to_string(),
        ));
    }

    let mut challenge = common::fetch_challenge(&mut tx, id).await?;

    if let Some(title) = payload.title {
        if !title.trim().is_empty() {
            challenge.title = title.trim().to_string();
        }
    }

    if let Some(description) = payload.description {
        if !description.trim().is_empty() {
            challenge.description = description.trim().to_string();
        }
    }

    if let Some(points) = payload.points {
        challenge.points = points;
    }

    if let Some(bonus_points) = payload.bonus_points {
        challenge.bonus_points = bonus_points;
    }

    if let Some(due_date) = payload.due_date {
        if due_date <= Utc::now() {
            return Err(AppError::BadRequest(
                "Due date cannot be in the past".to_string(),
            ));
        }
        challenge.due_date = due_date;
    }

    if let Some(new_status) = payload.status {
        if !status::ALL.contains(&new_status.as_str()) {
            return Err(AppError::BadRequest(format!(
                "Invalid status '{}'",
                new_status
            )));
        }
        challenge.status = new_status;
    }

    let challenge = sqlx::query_as::<_, Challenge>(
        r#"
        UPDATE challenges
        SET title = $2, description = $3, due_date = $4, points = $5,
            bonus_points = $6, status = $7, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&challenge.title)
    .bind(&challenge.description)
    .bind(challenge.due_date)
    .bind(challenge.points)
    .bind(challenge.bonus_points)
    .bind(&challenge.status)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(challenge))
}

/// Soft delete: hides the challenge everywhere, recoverable by the creator.
pub async fn soft_delete_challenge(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;

    if locked.creator_id != user_id {
        return Err(AppError::Forbidden(
            "Only the creator can delete this challenge".to_string(),
        ));
    }

    sqlx::query(
        "UPDATE challenges SET is_deleted = TRUE, deleted_at = now(), updated_at = now() WHERE id = $1",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Recover a soft-deleted challenge.
pub async fn recover_challenge(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    // Deleted rows are invisible to the usual lock query, so look here
    // without the is_deleted filter.
    let row = sqlx::query_as::<_, Challenge>("SELECT * FROM challenges WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Challenge not found".to_string()))?;

    if !row.is_deleted {
        return Err(AppError::BadRequest(
            "Challenge is already active".to_string(),
        ));
    }

    if row.creator_id != user_id {
        return Err(AppError::Forbidden(
            "Only the creator can recover this challenge".to_string(),
        ));
    }

    let challenge = sqlx::query_as::<_, Challenge>(
        r#"
        UPDATE challenges
        SET is_deleted = FALSE, deleted_at = NULL, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(challenge))
}

/// List the caller's own soft-deleted challenges.
pub async fn list_soft_deleted_challenges(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let challenges = sqlx::query_as::<_, Challenge>(
        "SELECT * FROM challenges WHERE is_deleted AND creator_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(challenges))
}

/// Permanently delete a challenge and everything hanging off it, including
/// stored progress attachments.
pub async fn delete_challenge(
    State(pool): State<PgPool>,
    State(storage): State<DynObjectStore>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;

    // Permanent delete also applies to soft-deleted challenges.
    let creator_id: i64 =
        sqlx::query_scalar("SELECT creator_id FROM challenges WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::NotFound("Challenge not found".to_string()))?;

    if creator_id != user_id {
        return Err(AppError::Forbidden(
            "Only the creator can delete this challenge".to_string(),
        ));
    }

    let file_ids: Vec<String> = sqlx::query_scalar(
        "SELECT file_id FROM challenge_progress WHERE challenge_id = $1 AND file_id IS NOT NULL",
    )
    .bind(id)
    .fetch_all(&mut *tx)
    .await?;

    // Child rows go via ON DELETE CASCADE.
    sqlx::query("DELETE FROM challenges WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    for file_id in file_ids {
        if let Err(e) = storage.delete(&file_id).await {
            tracing::warn!(%file_id, "failed to delete stored attachment: {}", e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

// src/handlers/membership.rs

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::challenge::{JoinChallengeRequest, status},
    storage::DynObjectStore,
    utils::auth::Claims,
};

use super::common;

/// Join a challenge. Private challenges require the matching invite code
/// (`?invite_code=`). The second participant moves a pending challenge to
/// in-progress.
pub async fn join_challenge(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Query(params): Query<JoinChallengeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;

    if locked.is_private {
        let supplied = params.invite_code.as_deref().unwrap_or("");
        if locked.invite_code.as_deref() != Some(supplied) {
            return Err(AppError::Forbidden(
                "A valid invite code is required to join this challenge".to_string(),
            ));
        }
    }

    if common::is_participant(&mut tx, id, user_id).await? {
        return Err(AppError::Conflict(
            "You are already a participant in this challenge".to_string(),
        ));
    }

    sqlx::query("INSERT INTO challenge_participants (challenge_id, user_id) VALUES ($1, $2)")
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    let participant_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM challenge_participants WHERE challenge_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

    if locked.status == status::PENDING && participant_count > 1 {
        sqlx::query("UPDATE challenges SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status::IN_PROGRESS)
            .execute(&mut *tx)
            .await?;
    }

    let challenge = common::fetch_challenge(&mut tx, id).await?;
    tx.commit().await?;

    Ok(Json(challenge))
}

/// Leave a challenge. The leaver's progress entry (and any stored attachment)
/// is removed; votes they cast are purged and each vote target's earned
/// points rebalanced; votes cast for them are dropped with their progress.
pub async fn leave_challenge(
    State(pool): State<PgPool>,
    State(storage): State<DynObjectStore>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;

    if !common::is_participant(&mut tx, id, user_id).await? {
        return Err(AppError::InvalidState(
            "You are not a participant in this challenge".to_string(),
        ));
    }

    sqlx::query("DELETE FROM challenge_participants WHERE challenge_id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    // Progress entry goes with the participant; remember the attachment.
    let file_id: Option<String> = sqlx::query_scalar(
        r#"
        DELETE FROM challenge_progress
        WHERE challenge_id = $1 AND user_id = $2
        RETURNING file_id
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .flatten();

    // Votes the leaver cast: take the point they granted back off each
    // target (floor at zero), then drop the votes.
    let granted_to: Vec<i64> = sqlx::query_scalar(
        "SELECT voted_for_id FROM challenge_votes WHERE challenge_id = $1 AND voter_id = $2",
    )
    .bind(id)
    .bind(user_id)
    .fetch_all(&mut *tx)
    .await?;

    for target_id in granted_to {
        sqlx::query(
            r#"
            UPDATE challenge_progress
            SET points_earned = GREATEST(0, points_earned - 1), updated_at = now()
            WHERE challenge_id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(target_id)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "DELETE FROM challenge_votes WHERE challenge_id = $1 AND (voter_id = $2 OR voted_for_id = $2)",
    )
    .bind(id)
    .bind(user_id)
    .execute(&mut *tx)
    .await?;

    common::refresh_evaluation_method(&mut tx, id).await?;

    let participant_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM challenge_participants WHERE challenge_id = $1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

    // Back below two active participants: the competition has not started.
    // Terminal statuses are left alone.
    if participant_count <= 1
        && (locked.status == status::PENDING || locked.status == status::IN_PROGRESS)
    {
        sqlx::query("UPDATE challenges SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status::PENDING)
            .execute(&mut *tx)
            .await?;
    }

    let challenge = common::fetch_challenge(&mut tx, id).await?;
    tx.commit().await?;

    if let Some(file_id) = file_id {
        if let Err(e) = storage.delete(&file_id).await {
            tracing::warn!(%file_id, "failed to delete stored attachment: {}", e);
        }
    }

    Ok(Json(challenge))
}

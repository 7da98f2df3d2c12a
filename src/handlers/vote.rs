// src/handlers/vote.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use sqlx::PgPool;

use crate::{
    error::AppError,
    models::{challenge::status, vote::VoteRequest},
    utils::auth::Claims,
};

use super::common;

/// Cast, change or toggle off a vote. One active vote per voter; each active
/// vote is worth exactly one point on the target's progress entry, so moving
/// or removing a vote rebalances before (re)adding.
pub async fn vote_for_participant(
    State(pool): State<PgPool>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<VoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let voter_id = claims.user_id()?;
    let voted_for_id = payload.voted_for_id;

    if voter_id == voted_for_id {
        return Err(AppError::BadRequest(
            "You cannot vote for yourself".to_string(),
        ));
    }

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;

    if locked.status == status::COMPLETED || locked.status == status::CANCELLED {
        return Err(AppError::InvalidState(
            "Voting is closed because the challenge has ended".to_string(),
        ));
    }

    if !common::is_participant(&mut tx, id, voted_for_id).await? {
        return Err(AppError::BadRequest(
            "Selected user is not a participant".to_string(),
        ));
    }

    let target_completed: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM challenge_progress
            WHERE challenge_id = $1 AND user_id = $2 AND completed
        )
        "#,
    )
    .bind(id)
    .bind(voted_for_id)
    .fetch_one(&mut *tx)
    .await?;

    if !target_completed {
        return Err(AppError::InvalidState(
            "You can only vote for users who have completed the challenge".to_string(),
        ));
    }

    let previous_target: Option<i64> = sqlx::query_scalar(
        "SELECT voted_for_id FROM challenge_votes WHERE challenge_id = $1 AND voter_id = $2",
    )
    .bind(id)
    .bind(voter_id)
    .fetch_optional(&mut *tx)
    .await?;

    if let Some(previous_target) = previous_target {
        // Take the previously granted point back, never below zero.
        sqlx::query(
            r#"
            UPDATE challenge_progress
            SET points_earned = GREATEST(0, points_earned - 1), updated_at = now()
            WHERE challenge_id = $1 AND user_id = $2
            "#,
        )
        .bind(id)
        .bind(previous_target)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM challenge_votes WHERE challenge_id = $1 AND voter_id = $2")
            .bind(id)
            .bind(voter_id)
            .execute(&mut *tx)
            .await?;

        // Same target again: a toggle-off, nothing is re-added.
        if previous_target == voted_for_id {
            common::refresh_evaluation_method(&mut tx, id).await?;
            tx.commit().await?;
            return Ok(Json(serde_json::json!({ "voted": false })));
        }
    }

    sqlx::query(
        "INSERT INTO challenge_votes (challenge_id, voter_id, voted_for_id) VALUES ($1, $2, $3)",
    )
    .bind(id)
    .bind(voter_id)
    .bind(voted_for_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE challenge_progress
        SET points_earned = points_earned + 1, updated_at = now()
        WHERE challenge_id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(voted_for_id)
    .execute(&mut *tx)
    .await?;

    common::refresh_evaluation_method(&mut tx, id).await?;
    tx.commit().await?;

    Ok(Json(serde_json::json!({ "voted": true })))
}

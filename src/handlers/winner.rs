// src/handlers/winner.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use sqlx::PgPool;

use crate::{
    error::AppError,
    finalize::{self, Outcome, Trigger},
    notify::DynNotifier,
    utils::auth::Claims,
};

/// Manually finalize a challenge. Creator or admin only; the heavy lifting is
/// the same engine the periodic sweep runs.
pub async fn finalize_challenge(
    State(pool): State<PgPool>,
    State(notifier): State<DynNotifier>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let creator_id: i64 =
        sqlx::query_scalar("SELECT creator_id FROM challenges WHERE id = $1 AND NOT is_deleted")
            .bind(id)
            .fetch_optional(&pool)
            .await?
            .ok_or(AppError::NotFound("Challenge not found".to_string()))?;

    if creator_id != user_id && !claims.is_admin() {
        return Err(AppError::Forbidden(
            "Only the creator can finalize this challenge".to_string(),
        ));
    }

    match finalize::run(&pool, &notifier, id, Utc::now(), Trigger::Manual).await? {
        Outcome::Completed {
            winner_id,
            points_awarded,
            evaluation_method,
        } => Ok((
            StatusCode::OK,
            Json(serde_json::json!({
                "winner": winner_id,
                "points_awarded": points_awarded,
                "evaluation_method": evaluation_method,
            })),
        )),
        // The cancellation is committed, but the outcome is still a failure
        // for the caller: there was nobody to award.
        Outcome::Cancelled => Ok((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "No participants completed the challenge. Challenge is cancelled.",
            })),
        )),
    }
}

// src/handlers/progress.rs

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        challenge::status,
        progress::{FileAttachment, ProgressEntry, SubmitProgressRequest, UpdateProgressRequest},
    },
    storage::{DynObjectStore, StoredObject},
    utils::auth::Claims,
};

use super::common::{self, LockedChallenge};

/// Terminal challenges accept no further progress mutations.
fn ensure_open(locked: &LockedChallenge) -> Result<(), AppError> {
    if locked.status == status::COMPLETED || locked.status == status::CANCELLED {
        return Err(AppError::InvalidState(format!(
            "Challenge is {} and no longer accepts progress changes",
            locked.status
        )));
    }
    Ok(())
}

async fn ensure_participant(
    tx: &mut Transaction<'_, Postgres>,
    challenge_id: i64,
    user_id: i64,
) -> Result<(), AppError> {
    if !common::is_participant(tx, challenge_id, user_id).await? {
        return Err(AppError::Forbidden(
            "You are not a participant in this challenge".to_string(),
        ));
    }
    Ok(())
}

async fn store_attachment(
    storage: &DynObjectStore,
    file: &FileAttachment,
) -> Result<StoredObject, AppError> {
    let bytes = BASE64
        .decode(&file.content_base64)
        .map_err(|_| AppError::BadRequest("Attachment is not valid base64".to_string()))?;
    storage.upload(&file.file_name, &bytes).await
}

/// Submit progress for the first time. Completing now, before anyone else
/// has, earns the first-finisher bonus on top of the base points; whether
/// anyone else finished is read under the same row lock the write commits
/// under, so two simultaneous submissions cannot both claim the bonus.
pub async fn submit_progress(
    State(pool): State<PgPool>,
    State(storage): State<DynObjectStore>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<SubmitProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;
    ensure_open(&locked)?;
    ensure_participant(&mut tx, id, user_id).await?;

    let already_submitted: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM challenge_progress WHERE challenge_id = $1 AND user_id = $2)",
    )
    .bind(id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    if already_submitted {
        return Err(AppError::Conflict(
            "Progress has already been submitted for this challenge".to_string(),
        ));
    }

    let someone_completed: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM challenge_progress WHERE challenge_id = $1 AND completed)",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    let points_earned = if payload.completed {
        locked.points + if someone_completed { 0 } else { locked.bonus_points }
    } else {
        0
    };
    let completed_at = payload.completed.then(Utc::now);

    let stored = match &payload.file {
        Some(file) => Some(store_attachment(&storage, file).await?),
        None => None,
    };

    let entry = sqlx::query_as::<_, ProgressEntry>(
        r#"
        INSERT INTO challenge_progress
            (challenge_id, user_id, completed, completed_at, points_earned,
             submission_link, notes, file_url, file_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING user_id, completed, completed_at, points_earned,
                  submission_link, notes, file_url, file_id
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(payload.completed)
    .bind(completed_at)
    .bind(points_earned)
    .bind(payload.submission_link.as_deref().unwrap_or("").trim())
    .bind(payload.notes.as_deref().unwrap_or("").trim())
    .bind(stored.as_ref().map(|s| s.url.as_str()))
    .bind(stored.as_ref().map(|s| s.id.as_str()))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// Update an existing progress entry. Only the false -> true completion
/// transition earns points (with the bonus if nobody else finished yet);
/// completed_at is set exactly once there. Empty optional fields never clear
/// stored values, and a new attachment replaces the old stored object.
pub async fn update_progress(
    State(pool): State<PgPool>,
    State(storage): State<DynObjectStore>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateProgressRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;
    ensure_open(&locked)?;
    ensure_participant(&mut tx, id, user_id).await?;

    let mut entry = sqlx::query_as::<_, ProgressEntry>(
        r#"
        SELECT user_id, completed, completed_at, points_earned,
               submission_link, notes, file_url, file_id
        FROM challenge_progress
        WHERE challenge_id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound(
        "No progress found for this challenge".to_string(),
    ))?;

    let was_completed = entry.completed;

    if payload.completed == Some(true) && !was_completed {
        let someone_completed: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM challenge_progress WHERE challenge_id = $1 AND completed)",
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        entry.completed = true;
        entry.completed_at = Some(Utc::now());
        // Vote-granted points already in points_earned are kept.
        entry.points_earned +=
            locked.points + if someone_completed { 0 } else { locked.bonus_points };
    }

    if let Some(link) = payload.submission_link {
        if !link.trim().is_empty() {
            entry.submission_link = link.trim().to_string();
        }
    }

    if let Some(notes) = payload.notes {
        if !notes.trim().is_empty() {
            entry.notes = notes.trim().to_string();
        }
    }

    let old_file_id = entry.file_id.clone();
    let mut replaced_file = false;
    if let Some(file) = &payload.file {
        let stored = store_attachment(&storage, file).await?;
        entry.file_url = Some(stored.url);
        entry.file_id = Some(stored.id);
        replaced_file = true;
    }

    let entry = sqlx::query_as::<_, ProgressEntry>(
        r#"
        UPDATE challenge_progress
        SET completed = $3, completed_at = $4, points_earned = $5,
            submission_link = $6, notes = $7, file_url = $8, file_id = $9,
            updated_at = now()
        WHERE challenge_id = $1 AND user_id = $2
        RETURNING user_id, completed, completed_at, points_earned,
                  submission_link, notes, file_url, file_id
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(entry.completed)
    .bind(entry.completed_at)
    .bind(entry.points_earned)
    .bind(&entry.submission_link)
    .bind(&entry.notes)
    .bind(entry.file_url.as_deref())
    .bind(entry.file_id.as_deref())
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    // The old object is only removed once the new reference is committed.
    if replaced_file {
        if let Some(old_id) = old_file_id {
            if let Err(e) = storage.delete(&old_id).await {
                tracing::warn!(file_id = %old_id, "failed to delete replaced attachment: {}", e);
            }
        }
    }

    Ok(Json(entry))
}

/// Remove the caller's progress entry and its stored attachment.
pub async fn remove_progress(
    State(pool): State<PgPool>,
    State(storage): State<DynObjectStore>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = claims.user_id()?;

    let mut tx = pool.begin().await?;
    let locked = common::lock_challenge(&mut tx, id).await?;
    ensure_open(&locked)?;
    ensure_participant(&mut tx, id, user_id).await?;

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
    .ok_or(AppError::NotFound(
        "No progress found for this user to remove".to_string(),
    ))?;

    tx.commit().await?;

    if let Some(file_id) = file_id {
        if let Err(e) = storage.delete(&file_id).await {
            tracing::warn!(%file_id, "failed to delete stored attachment: {}", e);
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

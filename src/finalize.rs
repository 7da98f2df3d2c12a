// src/finalize.rs
//
// Finalization Engine. The manual winner endpoint and the periodic sweep both
// call `run`, so the two paths cannot drift apart. The challenge row is
// locked (`SELECT ... FOR UPDATE`) for the whole transaction, which makes the
// already-finalized check race-free when a manual call and the sweep hit the
// same challenge at once.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use crate::{
    error::AppError,
    models::challenge::status,
    notify::{DynNotifier, Event},
};

/// Who asked for finalization. The sweep pre-filters on due date, a manual
/// caller has to be told the challenge is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual,
    Sweep,
}

/// Result of a committed finalization.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed {
        winner_id: i64,
        points_awarded: i32,
        evaluation_method: String,
    },
    /// No participant completed; the challenge was moved to 'cancelled'.
    Cancelled,
}

/// A completed progress entry, as ranked for winner selection.
#[derive(Debug, Clone, FromRow)]
pub struct CompletedEntry {
    pub user_id: i64,
    pub points_earned: i32,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Orders completed entries: points descending, then earlier completion,
/// then user id as a stable final key so exact ties stay deterministic.
pub fn rank_completed(entries: &mut [CompletedEntry]) {
    entries.sort_by(|a, b| {
        b.points_earned
            .cmp(&a.points_earned)
            .then_with(|| {
                let a_at = a.completed_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                let b_at = b.completed_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
                a_at.cmp(&b_at)
            })
            .then_with(|| a.user_id.cmp(&b.user_id))
    });
}

#[derive(FromRow)]
struct ChallengeHead {
    title: String,
    due_date: DateTime<Utc>,
    status: String,
    evaluation_method: String,
    winner_id: Option<i64>,
}

/// Finalizes one challenge: picks the winner, marks the terminal status and
/// pays out every completed participant, all in one transaction.
///
/// Fails without any state change on NotFound, already-finalized (Conflict)
/// and still-active (InvalidState). A challenge with zero completions is
/// committed to 'cancelled' and reported as `Outcome::Cancelled`.
pub async fn run(
    pool: &PgPool,
    notifier: &DynNotifier,
    challenge_id: i64,
    now: DateTime<Utc>,
    trigger: Trigger,
) -> Result<Outcome, AppError> {
    let mut tx = pool.begin().await?;

    // 1. Lock the challenge row for the rest of the transaction.
    let head = sqlx::query_as::<_, ChallengeHead>(
        r#"
        SELECT title, due_date, status, evaluation_method, winner_id
        FROM challenges
        WHERE id = $1 AND NOT is_deleted
        FOR UPDATE
        "#,
    )
    .bind(challenge_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Challenge not found".to_string()))?;

    // 2. Idempotency guard.
    if head.status == status::COMPLETED && head.winner_id.is_some() {
        return Err(AppError::Conflict(
            "Challenge has already been finalized".to_string(),
        ));
    }

    // 3. Not due yet. The sweep only selects due rows, so hitting this from
    //    Trigger::Sweep means the due date moved under us; skip either way.
    if head.due_date > now {
        if trigger == Trigger::Sweep {
            tracing::debug!(challenge_id, "due date moved forward since sweep scan, skipping");
        }
        return Err(AppError::InvalidState(
            "Challenge is still active".to_string(),
        ));
    }

    let participants: Vec<i64> =
        sqlx::query_scalar("SELECT user_id FROM challenge_participants WHERE challenge_id = $1")
            .bind(challenge_id)
            .fetch_all(&mut *tx)
            .await?;

    let mut completed = sqlx::query_as::<_, CompletedEntry>(
        r#"
        SELECT user_id, points_earned, completed_at
        FROM challenge_progress
        WHERE challenge_id = $1 AND completed
        "#,
    )
    .bind(challenge_id)
    .fetch_all(&mut *tx)
    .await?;

    // 4. Nobody finished: cancel. This is a committed mutation, not a rollback.
    if completed.is_empty() {
        sqlx::query(
            "UPDATE challenges SET status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(challenge_id)
        .bind(status::CANCELLED)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        notifier
            .notify(
                &participants,
                Event::ChallengeCancelled {
                    challenge_id,
                    title: head.title,
                },
            )
            .await;

        return Ok(Outcome::Cancelled);
    }

    // 5-6. Rank and pick the winner.
    rank_completed(&mut completed);
    let winner = completed[0].clone();

    // Conditional update doubles as a compare-and-set: even if another path
    // somehow finalized between our read and here, we refuse to re-award.
    let updated = sqlx::query(
        r#"
        UPDATE challenges
        SET status = $2, winner_id = $3, updated_at = now()
        WHERE id = $1 AND NOT (status = $2 AND winner_id IS NOT NULL)
        "#,
    )
    .bind(challenge_id)
    .bind(status::COMPLETED)
    .bind(winner.user_id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Challenge has already been finalized".to_string(),
        ));
    }

    // 7. Every completed participant is paid their points_earned, not just
    //    the winner. Independent per-user increments.
    for entry in &completed {
        sqlx::query("UPDATE users SET points = points + $2 WHERE id = $1")
            .bind(entry.user_id)
            .bind(i64::from(entry.points_earned))
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    notifier
        .notify(
            &participants,
            Event::ChallengeCompleted {
                challenge_id,
                title: head.title,
                winner_id: winner.user_id,
            },
        )
        .await;

    Ok(Outcome::Completed {
        winner_id: winner.user_id,
        points_awarded: winner.points_earned,
        evaluation_method: head.evaluation_method,
    })
}

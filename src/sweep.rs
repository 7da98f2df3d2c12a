// src/sweep.rs
//
// Periodic finalization sweep: every interval, finalize any challenge whose
// due date has passed and that is not already in a terminal state. One broken
// challenge must not abort the rest of the batch.

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use crate::{
    error::AppError,
    finalize::{self, Outcome, Trigger},
    models::challenge::status,
    state::AppState,
};

/// Spawns the sweep loop. It stops when a value is sent on `shutdown`.
pub fn spawn(state: AppState, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = Duration::from_secs(state.config.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval_secs = period.as_secs(), "finalization sweep started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = sweep_once(&state).await {
                        tracing::error!("finalization sweep run failed: {}", e);
                    }
                }
                _ = shutdown.changed() => {
                    tracing::info!("finalization sweep stopped");
                    break;
                }
            }
        }
    })
}

/// One sweep pass over all due, unfinished challenges.
pub async fn sweep_once(state: &AppState) -> Result<(), AppError> {
    let now = Utc::now();

    let due: Vec<i64> = sqlx::query_scalar(
        r#"
        SELECT id FROM challenges
        WHERE status NOT IN ($1, $2)
          AND due_date <= $3
          AND NOT is_deleted
        ORDER BY due_date
        "#,
    )
    .bind(status::COMPLETED)
    .bind(status::CANCELLED)
    .bind(now)
    .fetch_all(&state.pool)
    .await?;

    if due.is_empty() {
        return Ok(());
    }

    tracing::debug!(count = due.len(), "sweeping due challenges");

    for challenge_id in due {
        match finalize::run(&state.pool, &state.notifier, challenge_id, now, Trigger::Sweep).await {
            Ok(Outcome::Completed { winner_id, .. }) => {
                tracing::info!(challenge_id, winner_id, "challenge finalized by sweep");
            }
            Ok(Outcome::Cancelled) => {
                tracing::info!(challenge_id, "challenge cancelled by sweep (no completions)");
            }
            // Keep going: a single bad challenge must not starve the batch.
            Err(e) => {
                tracing::warn!(challenge_id, "sweep could not finalize challenge: {}", e);
            }
        }
    }

    Ok(())
}

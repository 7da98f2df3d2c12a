// src/notify.rs

use std::sync::Arc;

use async_trait::async_trait;

/// Events worth telling participants about.
#[derive(Debug, Clone)]
pub enum Event {
    ChallengeCompleted {
        challenge_id: i64,
        title: String,
        winner_id: i64,
    },
    ChallengeCancelled {
        challenge_id: i64,
        title: String,
    },
}

/// External notification collaborator. Delivery (mail, push, ...) is not this
/// service's concern; failures must never affect the triggering operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[i64], event: Event);
}

pub type DynNotifier = Arc<dyn Notifier>;

/// Default notifier: writes the event to the log stream.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipients: &[i64], event: Event) {
        match event {
            Event::ChallengeCompleted {
                challenge_id,
                title,
                winner_id,
            } => {
                tracing::info!(
                    challenge_id,
                    winner_id,
                    recipients = recipients.len(),
                    "challenge '{}' completed",
                    title
                );
            }
            Event::ChallengeCancelled {
                challenge_id,
                title,
            } => {
                tracing::info!(
                    challenge_id,
                    recipients = recipients.len(),
                    "challenge '{}' cancelled with no completions",
                    title
                );
            }
        }
    }
}

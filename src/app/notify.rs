use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::domain::field::FieldKind;

/// Lossless, ordered fan-out to any number of subscribers. Closed receivers
/// are pruned on the next publish.
pub struct Fanout<T> {
    subscribers: Vec<mpsc::UnboundedSender<T>>,
}

impl<T: Clone> Fanout<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Returns how many subscribers received the item.
    pub fn publish(&mut self, item: T) -> usize {
        self.subscribers.retain(|tx| tx.send(item.clone()).is_ok());
        self.subscribers.len()
    }

    pub fn clear(&mut self) {
        self.subscribers.clear();
    }
}

impl<T: Clone> Default for Fanout<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationAction {
    Like,
    Unlike,
    AddComment,
    DeleteComment,
}

impl MutationAction {
    /// Message shown to the user when the change did not persist.
    pub fn failure_message(&self) -> &'static str {
        match self {
            Self::Like => "Failed to like post. Please try again.",
            Self::Unlike => "Failed to remove like. Please try again.",
            Self::AddComment => "Failed to add comment. Please try again.",
            Self::DeleteComment => "Failed to delete comment. Please try again.",
        }
    }
}

impl fmt::Display for MutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Like => "like",
            Self::Unlike => "unlike",
            Self::AddComment => "add_comment",
            Self::DeleteComment => "delete_comment",
        };
        f.write_str(name)
    }
}

/// A remote write that failed after its optimistic change was shown and then
/// rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MutationFailure {
    pub post_id: Uuid,
    pub field: FieldKind,
    pub action: MutationAction,
    pub message: String,
    pub cause: String,
    #[serde(with = "time::serde::rfc3339")]
    pub failed_at: OffsetDateTime,
}

impl MutationFailure {
    pub fn new(post_id: Uuid, field: FieldKind, action: MutationAction, cause: &anyhow::Error) -> Self {
        Self {
            post_id,
            field,
            action,
            message: action.failure_message().to_string(),
            cause: format!("{:#}", cause),
            failed_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Channel that carries every rollback to whoever is listening.
#[derive(Clone, Default)]
pub struct FailureNotifier {
    fanout: Arc<Mutex<Fanout<MutationFailure>>>,
}

impl FailureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<MutationFailure> {
        self.fanout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .subscribe()
    }

    pub fn report(&self, failure: MutationFailure) {
        warn!(
            post_id = %failure.post_id,
            field = ?failure.field,
            action = %failure.action,
            cause = %failure.cause,
            "optimistic mutation rolled back"
        );

        let delivered = self
            .fanout
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .publish(failure.clone());

        if delivered == 0 {
            error!(
                post_id = %failure.post_id,
                action = %failure.action,
                "mutation failure had no listener"
            );
        }
    }
}

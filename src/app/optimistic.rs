//! Local-first mutations with rollback.
//!
//! [`OptimisticMutator::apply`] publishes the new value of a post field right
//! away, persists the equivalent change remotely on a background task, and
//! restores the captured prior value if the remote write fails.
//!
//! Two mutations of the same field may overlap. The second one captures the
//! first one's unconfirmed value as its prior, and a failure of the first one
//! rolls back over the second. [`MutationHandle::overlapped`] reports this;
//! the next feed snapshot brings the field back in line with the remote.

use std::future::Future;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app::notify::{FailureNotifier, MutationAction, MutationFailure};
use crate::app::store::LocalStateStore;
use crate::domain::field::{Field, FieldKind};

/// Rejections that happen before anything is published.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MutationError {
    #[error("post {0} is not loaded")]
    Detached(Uuid),
    #[error("comment {0} not found")]
    CommentNotFound(Uuid),
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    Confirmed,
    RolledBack(MutationFailure),
}

#[derive(Debug)]
pub struct MutationHandle<T> {
    pub post_id: Uuid,
    pub field: FieldKind,
    pub action: MutationAction,
    pub prior: T,
    pub next: T,
    overlapped: bool,
    outcome: oneshot::Receiver<MutationOutcome>,
}

impl<T> MutationHandle<T> {
    /// True when another mutation of the same field was still in flight.
    pub fn overlapped(&self) -> bool {
        self.overlapped
    }

    /// Waits for the remote write to resolve.
    pub async fn settled(self) -> MutationOutcome {
        // The task always sends before exiting unless the runtime shut down
        // under it, in which case the change was never confirmed.
        let (post_id, field, action) = (self.post_id, self.field, self.action);
        self.outcome.await.unwrap_or_else(|_| {
            MutationOutcome::RolledBack(MutationFailure::new(
                post_id,
                field,
                action,
                &anyhow::anyhow!("runtime shut down before the remote write resolved"),
            ))
        })
    }
}

#[derive(Clone)]
pub struct OptimisticMutator {
    store: LocalStateStore,
    failures: FailureNotifier,
}

impl OptimisticMutator {
    pub fn new(store: LocalStateStore, failures: FailureNotifier) -> Self {
        Self { store, failures }
    }

    pub fn store(&self) -> &LocalStateStore {
        &self.store
    }

    /// Applies `compute` to field `F` of `post_id` locally, then runs the
    /// future built by `remote` from `(prior, next)` on a spawned task.
    ///
    /// `compute` must be pure. On remote failure the exact prior value is
    /// published again and one [`MutationFailure`] is reported.
    pub fn apply<F, C, R, Fut>(
        &self,
        post_id: Uuid,
        action: MutationAction,
        compute: C,
        remote: R,
    ) -> Result<MutationHandle<F::Value>, MutationError>
    where
        F: Field,
        C: FnOnce(&F::Value) -> F::Value,
        R: FnOnce(&F::Value, &F::Value) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.apply_described::<F, _, C, R, Fut>(post_id, move |_, _| action, compute, remote)
    }

    /// Like [`apply`](Self::apply), for mutations whose action is only known
    /// once `compute` has seen the current value. `describe` names the action
    /// from the `(prior, next)` pair captured under the store lock.
    pub fn apply_described<F, D, C, R, Fut>(
        &self,
        post_id: Uuid,
        describe: D,
        compute: C,
        remote: R,
    ) -> Result<MutationHandle<F::Value>, MutationError>
    where
        F: Field,
        D: FnOnce(&F::Value, &F::Value) -> MutationAction,
        C: FnOnce(&F::Value) -> F::Value,
        R: FnOnce(&F::Value, &F::Value) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let (prior, next, ticket) = self
            .store
            .begin::<F, C>(post_id, compute)
            .ok_or(MutationError::Detached(post_id))?;
        let action = describe(&prior, &next);

        let overlapped = ticket.overlapped;
        if overlapped {
            warn!(
                post_id = %post_id,
                field = ?F::KIND,
                action = %action,
                "mutation overlaps one still in flight; a rollback of the earlier one will discard this change locally"
            );
        }

        let write = remote(&prior, &next);
        let store = self.store.downgrade();
        let failures = self.failures.clone();
        let rollback_to = prior.clone();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let outcome = match write.await {
                Ok(()) => {
                    store.settle(&ticket);
                    debug!(post_id = %post_id, action = %action, "mutation confirmed");
                    MutationOutcome::Confirmed
                }
                Err(err) => {
                    let restored = store.rollback::<F>(&ticket, rollback_to);
                    if !restored {
                        debug!(post_id = %post_id, "view gone before rollback, nothing to restore");
                    }
                    let failure = MutationFailure::new(post_id, F::KIND, action, &err);
                    failures.report(failure.clone());
                    MutationOutcome::RolledBack(failure)
                }
            };
            let _ = tx.send(outcome);
        });

        Ok(MutationHandle {
            post_id,
            field: F::KIND,
            action,
            prior,
            next,
            overlapped,
            outcome: rx,
        })
    }
}

use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::app::notify::MutationAction;
use crate::app::optimistic::{MutationError, MutationHandle, OptimisticMutator};
use crate::domain::engagement::{Comment, LikeSet};
use crate::domain::field::{Comments, FieldKind, Likes};
use crate::domain::user::Viewer;
use crate::infra::documents::{DocumentRef, FieldMutation, RemoteMutationSink};

/// Likes and comments, applied locally first and persisted in the background.
#[derive(Clone)]
pub struct EngagementService {
    mutator: OptimisticMutator,
    sink: Arc<dyn RemoteMutationSink>,
}

impl EngagementService {
    pub fn new(mutator: OptimisticMutator, sink: Arc<dyn RemoteMutationSink>) -> Self {
        Self { mutator, sink }
    }

    /// Likes the post when the viewer has not liked it yet, otherwise removes
    /// the like. The choice is made against the value under the store lock,
    /// so concurrent toggles alternate instead of repeating.
    pub fn toggle_like(
        &self,
        viewer: &Viewer,
        post_id: Uuid,
    ) -> Result<MutationHandle<LikeSet>, MutationError> {
        let user_id = viewer.id;

        let handle = self.mutator.apply_described::<Likes, _, _, _, _>(
            post_id,
            move |_prior, next| {
                if next.contains(user_id) {
                    MutationAction::Like
                } else {
                    MutationAction::Unlike
                }
            },
            move |likes| {
                if likes.contains(user_id) {
                    likes.without(user_id)
                } else {
                    likes.with(user_id)
                }
            },
            |_prior, next| {
                let field = FieldKind::Likes.document_key();
                let value = json!(user_id);
                let mutation = if next.contains(user_id) {
                    FieldMutation::AddToSet { field, value }
                } else {
                    FieldMutation::RemoveFromSet { field, value }
                };
                self.write(post_id, mutation)
            },
        )?;

        info!(post_id = %post_id, user_id = %user_id, action = %handle.action, "like toggled");
        Ok(handle)
    }

    pub fn add_comment(
        &self,
        viewer: &Viewer,
        post_id: Uuid,
        text: &str,
    ) -> Result<(Comment, MutationHandle<Vec<Comment>>), MutationError> {
        let comment =
            Comment::compose(viewer, text).map_err(|err| MutationError::Invalid(err.to_string()))?;
        let value =
            serde_json::to_value(&comment).map_err(|err| MutationError::Invalid(err.to_string()))?;

        let appended = comment.clone();
        let handle = self.mutator.apply::<Comments, _, _, _>(
            post_id,
            MutationAction::AddComment,
            move |comments| {
                let mut next = comments.clone();
                next.push(appended);
                next
            },
            |_, _| {
                self.write(
                    post_id,
                    FieldMutation::Append {
                        field: FieldKind::Comments.document_key(),
                        value,
                    },
                )
            },
        )?;

        info!(post_id = %post_id, comment_id = %comment.id, "comment added");
        Ok((comment, handle))
    }

    /// Only the comment author or the post owner may delete. Anyone else is
    /// turned away before the local state changes.
    pub fn delete_comment(
        &self,
        viewer: &Viewer,
        post_id: Uuid,
        comment_id: Uuid,
    ) -> Result<MutationHandle<Vec<Comment>>, MutationError> {
        let post = self
            .mutator
            .store()
            .post(post_id)
            .ok_or(MutationError::Detached(post_id))?;
        let comment = post
            .comment(comment_id)
            .cloned()
            .ok_or(MutationError::CommentNotFound(comment_id))?;

        if !comment.deletable_by(viewer.id, post.owner_id) {
            return Err(MutationError::Forbidden(
                "only the comment author or the post owner can delete this comment",
            ));
        }

        // A comment stored before ids existed is removed by its stored form.
        let value = match &comment.stored {
            Some(stored) => stored.clone(),
            None => serde_json::to_value(&comment)
                .map_err(|err| MutationError::Invalid(err.to_string()))?,
        };

        let handle = self.mutator.apply::<Comments, _, _, _>(
            post_id,
            MutationAction::DeleteComment,
            move |comments| {
                comments
                    .iter()
                    .filter(|existing| existing.id != comment_id)
                    .cloned()
                    .collect()
            },
            |_, _| {
                self.write(
                    post_id,
                    FieldMutation::RemoveFromSet {
                        field: FieldKind::Comments.document_key(),
                        value,
                    },
                )
            },
        )?;

        info!(post_id = %post_id, comment_id = %comment_id, "comment deleted");
        Ok(handle)
    }

    fn write(&self, post_id: Uuid, mutation: FieldMutation) -> BoxFuture<'static, anyhow::Result<()>> {
        let sink = self.sink.clone();
        async move { sink.mutate(DocumentRef::post(post_id), mutation).await }.boxed()
    }
}

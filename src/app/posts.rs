use anyhow::Context;
use bytes::Bytes;
use image::ImageFormat;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::store::LocalStateStore;
use crate::domain::post::{format_hashtags, NewPost, Post, ValidationError};
use crate::domain::user::Viewer;
use crate::infra::documents::{DocumentRef, DocumentStore, POSTS_COLLECTION};
use crate::infra::storage::BlobStore;

#[derive(Debug, Error)]
pub enum PostError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("an upload is already in progress")]
    UploadInProgress,
    #[error("post not found")]
    NotFound,
    #[error("only the owner can delete this post")]
    Forbidden,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct PostService {
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    store: LocalStateStore,
    upload_max_bytes: usize,
    upload_lock: Arc<Mutex<()>>,
}

impl PostService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        store: LocalStateStore,
        upload_max_bytes: usize,
        upload_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            documents,
            blobs,
            store,
            upload_max_bytes,
            upload_lock,
        }
    }

    /// Stores the image, then the post document that points at it. A second
    /// upload while one is running is rejected.
    pub async fn upload(&self, viewer: &Viewer, new_post: NewPost) -> Result<Post, PostError> {
        let _uploading = self
            .upload_lock
            .try_lock()
            .map_err(|_| PostError::UploadInProgress)?;

        new_post.validate(self.upload_max_bytes)?;
        let format = detect_image(new_post.image.clone()).await?;
        let (extension, content_type) = match format {
            ImageFormat::Jpeg => ("jpg", "image/jpeg"),
            ImageFormat::Png => ("png", "image/png"),
            ImageFormat::WebP => ("webp", "image/webp"),
            _ => return Err(ValidationError::UnsupportedImage.into()),
        };

        let now = OffsetDateTime::now_utc();
        let key = format!(
            "images/{}/{}.{}",
            viewer.id,
            now.unix_timestamp_nanos() / 1_000_000,
            extension
        );
        let url = self
            .blobs
            .put(&key, content_type, new_post.image)
            .await
            .context("failed to store image")?;

        let body = json!({
            "url": url,
            "user_id": viewer.id,
            "user_email": viewer.email,
            "caption": new_post.caption.trim(),
            "description": new_post.description.trim(),
            "hashtags": format_hashtags(&new_post.hashtags),
            "created_at": now.format(&Rfc3339).context("failed to format timestamp")?,
            "likes": [],
            "comments": [],
        });

        let document = match self.documents.create(POSTS_COLLECTION, body).await {
            Ok(document) => document,
            Err(err) => {
                if let Err(cleanup) = self.blobs.delete_url(&url).await {
                    warn!(url = %url, error = ?cleanup, "failed to remove orphaned image");
                }
                return Err(PostError::Internal(err.context("failed to create post")));
            }
        };

        let post = Post::from_document(document.id, document.body, document.created_at)
            .context("created post failed validation")?;
        info!(post_id = %post.id, owner_id = %viewer.id, key = %key, "post uploaded");
        Ok(post)
    }

    /// Deletes the post document, then its image, then drops it locally.
    pub async fn delete(&self, viewer: &Viewer, post_id: Uuid) -> Result<(), PostError> {
        let document = self
            .documents
            .get(DocumentRef::post(post_id))
            .await?
            .ok_or(PostError::NotFound)?;
        let post = Post::from_document(document.id, document.body, document.created_at)
            .context("stored post failed validation")?;

        if post.owner_id != viewer.id {
            return Err(PostError::Forbidden);
        }

        if !self.documents.delete(DocumentRef::post(post_id)).await? {
            return Err(PostError::NotFound);
        }

        // The document is gone at this point; a leftover image is only logged.
        if let Err(err) = self.blobs.delete_url(&post.url).await {
            warn!(post_id = %post_id, url = %post.url, error = ?err, "failed to delete post image");
        }

        self.store.remove_post(post_id);
        info!(post_id = %post_id, owner_id = %viewer.id, "post deleted");
        Ok(())
    }
}

/// Sniffs the format and fully decodes the image off the async runtime.
async fn detect_image(bytes: Bytes) -> Result<ImageFormat, PostError> {
    let decoded = tokio::task::spawn_blocking(move || {
        let format = image::guess_format(&bytes).ok()?;
        image::load_from_memory_with_format(&bytes, format).ok()?;
        Some(format)
    })
    .await
    .context("image decode task failed")?;

    decoded.ok_or(PostError::Invalid(ValidationError::UnsupportedImage))
}

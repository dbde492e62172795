use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::engagement::{Comment, LikeSet};

pub const MAX_CAPTION_LEN: usize = 2200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: Option<String>,
    pub url: String,
    pub caption: String,
    pub description: String,
    pub hashtags: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub likes: LikeSet,
    pub comments: Vec<Comment>,
}

/// Which list of posts a subscription feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedQuery {
    /// Every post, newest first.
    Discover,
    /// Posts owned by one user, newest first.
    Gallery { owner_id: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSnapshot {
    pub query: FeedQuery,
    pub posts: Vec<Post>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document {id} is malformed: {source}")]
    Malformed {
        id: Uuid,
        #[source]
        source: serde_json::Error,
    },
}

// Shape of a post as stored in the document store. Every field the upload flow
// may omit is optional here and defaulted in `Post::from_document`.
#[derive(Deserialize)]
struct PostDocument {
    url: String,
    user_id: Uuid,
    #[serde(default)]
    user_email: Option<String>,
    caption: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    hashtags: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    created_at: Option<OffsetDateTime>,
    #[serde(default)]
    likes: Vec<Uuid>,
    #[serde(default)]
    comments: Vec<Value>,
}

#[derive(Deserialize)]
struct CommentDocument {
    #[serde(default)]
    id: Option<Uuid>,
    user_id: Uuid,
    #[serde(default)]
    user_email: Option<String>,
    text: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

impl Post {
    /// Validates an untyped document body into a `Post`.
    ///
    /// `stored_at` is the store's own timestamp for the row and stands in for a
    /// missing `created_at`. Comments written before ids existed get a
    /// deterministic id derived from their content, so they keep the same
    /// identity across snapshots.
    pub fn from_document(
        id: Uuid,
        body: Value,
        stored_at: OffsetDateTime,
    ) -> Result<Self, DocumentError> {
        let malformed = |source| DocumentError::Malformed { id, source };
        let doc: PostDocument = serde_json::from_value(body).map_err(malformed)?;

        let mut comments = Vec::with_capacity(doc.comments.len());
        for raw in doc.comments {
            let legacy_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.to_string().as_bytes());
            let comment: CommentDocument =
                serde_json::from_value(raw.clone()).map_err(malformed)?;
            comments.push(Comment {
                id: comment.id.unwrap_or(legacy_id),
                user_id: comment.user_id,
                user_email: comment.user_email.unwrap_or_default(),
                text: comment.text,
                created_at: comment.created_at,
                stored: comment.id.is_none().then_some(raw),
            });
        }

        Ok(Self {
            id,
            owner_id: doc.user_id,
            owner_email: doc.user_email,
            url: doc.url,
            caption: doc.caption,
            description: doc.description.unwrap_or_default(),
            hashtags: doc.hashtags.unwrap_or_default(),
            created_at: doc.created_at.unwrap_or(stored_at),
            likes: doc.likes.into_iter().collect(),
            comments,
        })
    }

    pub fn liked_by(&self, user_id: Uuid) -> bool {
        self.likes.contains(user_id)
    }

    pub fn comment(&self, comment_id: Uuid) -> Option<&Comment> {
        self.comments.iter().find(|comment| comment.id == comment_id)
    }

    /// Comments ordered for display, newest first.
    pub fn comments_newest_first(&self) -> Vec<&Comment> {
        let mut comments: Vec<&Comment> = self.comments.iter().collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        comments
    }

    /// Case-insensitive substring match against the hashtag string.
    /// A blank query matches every post.
    pub fn matches_hashtag(&self, query: &str) -> bool {
        let query = query.trim();
        if query.is_empty() {
            return true;
        }
        self.hashtags
            .to_lowercase()
            .contains(&query.to_lowercase())
    }

    pub fn matches(&self, query: &FeedQuery) -> bool {
        match query {
            FeedQuery::Discover => true,
            FeedQuery::Gallery { owner_id } => self.owner_id == *owner_id,
        }
    }
}

/// Normalizes free-form hashtag input: `nature, travel #sea` becomes
/// `#nature,#travel,#sea`.
pub fn format_hashtags(input: &str) -> String {
    input
        .split(|c: char| c == ' ' || c == ',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(|tag| {
            if tag.starts_with('#') {
                tag.to_string()
            } else {
                format!("#{}", tag)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub image: Bytes,
    pub caption: String,
    pub description: String,
    pub hashtags: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no image selected")]
    MissingImage,
    #[error("image exceeds {max_bytes} bytes")]
    ImageTooLarge { max_bytes: usize },
    #[error("unsupported image format")]
    UnsupportedImage,
    #[error("caption is required")]
    MissingCaption,
    #[error("caption must be at most 2200 characters")]
    CaptionTooLong,
    #[error("hashtags cannot be empty")]
    MissingHashtags,
}

impl NewPost {
    /// Checks the form fields. Image decoding happens in the upload flow.
    pub fn validate(&self, max_bytes: usize) -> Result<(), ValidationError> {
        if self.image.is_empty() {
            return Err(ValidationError::MissingImage);
        }
        if self.image.len() > max_bytes {
            return Err(ValidationError::ImageTooLarge { max_bytes });
        }
        if self.caption.trim().is_empty() {
            return Err(ValidationError::MissingCaption);
        }
        if self.caption.chars().count() > MAX_CAPTION_LEN {
            return Err(ValidationError::CaptionTooLong);
        }
        if format_hashtags(&self.hashtags).is_empty() {
            return Err(ValidationError::MissingHashtags);
        }
        Ok(())
    }
}

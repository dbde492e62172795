use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::user::Viewer;

pub const MAX_COMMENT_LEN: usize = 1000;

/// Users who liked a post. Keeps insertion order, never holds an id twice.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Uuid>", into = "Vec<Uuid>")]
pub struct LikeSet(Vec<Uuid>);

impl LikeSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn contains(&self, user_id: Uuid) -> bool {
        self.0.contains(&user_id)
    }

    /// Returns false when the user was already present.
    pub fn insert(&mut self, user_id: Uuid) -> bool {
        if self.contains(user_id) {
            return false;
        }
        self.0.push(user_id);
        true
    }

    pub fn remove(&mut self, user_id: Uuid) -> bool {
        let before = self.0.len();
        self.0.retain(|id| *id != user_id);
        self.0.len() != before
    }

    pub fn with(&self, user_id: Uuid) -> Self {
        let mut next = self.clone();
        next.insert(user_id);
        next
    }

    pub fn without(&self, user_id: Uuid) -> Self {
        let mut next = self.clone();
        next.remove(user_id);
        next
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Uuid>> for LikeSet {
    fn from(ids: Vec<Uuid>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<LikeSet> for Vec<Uuid> {
    fn from(set: LikeSet) -> Self {
        set.0
    }
}

impl FromIterator<Uuid> for LikeSet {
    fn from_iter<I: IntoIterator<Item = Uuid>>(iter: I) -> Self {
        let mut set = LikeSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_email: String,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// The element exactly as stored, kept for comments written without an
    /// id. The remote matches those by whole value.
    #[serde(skip)]
    pub stored: Option<Value>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommentError {
    #[error("comment cannot be empty")]
    Empty,
    #[error("comment exceeds 1000 characters")]
    TooLong,
}

impl Comment {
    /// Builds a new comment authored by `viewer`, stamped with the current time.
    pub fn compose(viewer: &Viewer, text: &str) -> Result<Self, CommentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CommentError::Empty);
        }
        if text.chars().count() > MAX_COMMENT_LEN {
            return Err(CommentError::TooLong);
        }

        Ok(Self {
            id: Uuid::new_v4(),
            user_id: viewer.id,
            user_email: viewer.email.clone(),
            text: text.to_string(),
            created_at: OffsetDateTime::now_utc(),
            stored: None,
        })
    }

    /// The comment author and the owner of the post may delete a comment.
    pub fn deletable_by(&self, viewer_id: Uuid, post_owner_id: Uuid) -> bool {
        self.user_id == viewer_id || post_owner_id == viewer_id
    }
}

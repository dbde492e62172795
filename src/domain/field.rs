use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::domain::engagement::{Comment, LikeSet};
use crate::domain::post::Post;

/// A mutable field of a [`Post`] that optimistic mutations can target.
pub trait Field: Send + Sync + 'static {
    type Value: Clone + PartialEq + Debug + Send + Sync + 'static;

    const KIND: FieldKind;

    fn get(post: &Post) -> &Self::Value;

    fn set(post: &mut Post, value: Self::Value);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Likes,
    Comments,
}

impl FieldKind {
    /// Key of the field inside the stored document.
    pub fn document_key(&self) -> &'static str {
        match self {
            Self::Likes => "likes",
            Self::Comments => "comments",
        }
    }
}

pub struct Likes;

impl Field for Likes {
    type Value = LikeSet;

    const KIND: FieldKind = FieldKind::Likes;

    fn get(post: &Post) -> &LikeSet {
        &post.likes
    }

    fn set(post: &mut Post, value: LikeSet) {
        post.likes = value;
    }
}

pub struct Comments;

impl Field for Comments {
    type Value = Vec<Comment>;

    const KIND: FieldKind = FieldKind::Comments;

    fn get(post: &Post) -> &Vec<Comment> {
        &post.comments
    }

    fn set(post: &mut Post, value: Vec<Comment>) {
        post.comments = value;
    }
}

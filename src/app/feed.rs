use anyhow::Result;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::post::{FeedQuery, FeedSnapshot, Post};
use crate::infra::documents::{DocumentStore, POSTS_COLLECTION};

const SNAPSHOT_BUFFER: usize = 16;

#[derive(Clone)]
pub struct FeedService {
    documents: Arc<dyn DocumentStore>,
}

impl FeedService {
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Current posts for `query`. Documents that fail validation are skipped.
    pub async fn load(&self, query: &FeedQuery) -> Result<FeedSnapshot> {
        let documents = self.documents.query(query).await?;

        let mut posts = Vec::with_capacity(documents.len());
        for document in documents {
            match Post::from_document(document.id, document.body, document.created_at) {
                Ok(post) if post.matches(query) => posts.push(post),
                Ok(post) => {
                    debug!(post_id = %post.id, "document outside query, skipping");
                }
                Err(err) => {
                    warn!(post_id = %document.id, error = %err, "skipping invalid post document");
                }
            }
        }

        Ok(FeedSnapshot {
            query: *query,
            posts,
        })
    }

    /// Live snapshots for `query`: one right away, then one after every change
    /// to the posts collection. The pump restarts after `backoff` whenever the
    /// change stream fails and stops once the receiver is dropped.
    pub fn subscribe(&self, query: FeedQuery, backoff: Duration) -> mpsc::Receiver<FeedSnapshot> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        let service = self.clone();

        tokio::spawn(async move {
            loop {
                match service.pump(&query, &tx).await {
                    Ok(Pump::ReceiverGone) => {
                        debug!(query = ?query, "feed subscriber gone, stopping");
                        return;
                    }
                    Ok(Pump::StreamEnded) => {
                        warn!(query = ?query, "change stream ended, restarting");
                    }
                    Err(err) => {
                        warn!(query = ?query, error = ?err, "feed subscription failed, restarting");
                    }
                }

                if tx.is_closed() {
                    return;
                }
                tokio::time::sleep(backoff).await;
            }
        });

        rx
    }

    async fn pump(&self, query: &FeedQuery, tx: &mpsc::Sender<FeedSnapshot>) -> Result<Pump> {
        // Listen before the first load so no change slips in between.
        let mut changes = self.documents.watch().await?;

        if tx.send(self.load(query).await?).await.is_err() {
            return Ok(Pump::ReceiverGone);
        }
        info!(query = ?query, "feed subscription started");

        loop {
            let notice = tokio::select! {
                _ = tx.closed() => return Ok(Pump::ReceiverGone),
                notice = changes.next() => notice,
            };
            let Some(notice) = notice else {
                break;
            };
            let notice = notice?;
            if notice.collection != POSTS_COLLECTION {
                continue;
            }
            debug!(post_id = %notice.id, op = ?notice.op, "posts changed");
            if tx.send(self.load(query).await?).await.is_err() {
                return Ok(Pump::ReceiverGone);
            }
        }

        Ok(Pump::StreamEnded)
    }
}

enum Pump {
    ReceiverGone,
    StreamEnded,
}

/// Posts whose hashtags contain `text`, ignoring case. A blank query keeps
/// every post.
pub fn search(posts: &[Post], text: &str) -> Vec<Post> {
    posts
        .iter()
        .filter(|post| post.matches_hashtag(text))
        .cloned()
        .collect()
}

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, info};

use crate::app::feed::FeedService;
use crate::app::store::{LocalStateStore, StoreEvent};
use crate::domain::post::FeedQuery;

/// Keeps the list for `query` in the store in line with the remote until the
/// store is closed.
pub async fn run(
    feed: FeedService,
    store: LocalStateStore,
    query: FeedQuery,
    backoff: Duration,
) -> Result<()> {
    info!(query = ?query, "feed sync started");
    let mut snapshots = feed.subscribe(query, backoff);

    while let Some(snapshot) = snapshots.recv().await {
        if store.is_closed() {
            break;
        }
        let count = snapshot.posts.len();
        store.apply_snapshot(snapshot);
        debug!(query = ?query, posts = count, "snapshot applied");
    }

    info!(query = ?query, "feed sync stopped");
    Ok(())
}

/// Logs every store change. Used by the headless `watch` mode.
pub async fn log_events(store: LocalStateStore) -> Result<()> {
    let mut events = store.subscribe();
    while let Some(event) = events.recv().await {
        match event {
            StoreEvent::FeedReplaced { query, posts } => {
                info!(query = ?query, posts = posts.len(), "feed replaced");
            }
            StoreEvent::PostChanged { post } => {
                info!(
                    post_id = %post.id,
                    likes = post.likes.len(),
                    comments = post.comments.len(),
                    "post changed"
                );
            }
            StoreEvent::PostRemoved { post_id } => info!(post_id = %post_id, "post removed"),
            StoreEvent::ViewOpened { post } => info!(post_id = %post.id, "view opened"),
            StoreEvent::ViewClosed { post_id } => info!(post_id = %post_id, "view closed"),
        }
    }
    Ok(())
}

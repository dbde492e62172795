use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use base64::Engine;
use bytes::Bytes;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::app::feed::search;
use crate::domain::engagement::Comment;
use crate::domain::post::{FeedQuery, NewPost, Post};
use crate::http::{AppError, SessionViewer};
use crate::AppState;

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

/// A post as the UI renders it, from the point of view of the session user.
#[derive(Serialize)]
pub struct PostView {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub owner_email: Option<String>,
    pub url: String,
    pub caption: String,
    pub description: String,
    pub hashtags: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub like_count: usize,
    pub liked: bool,
    pub comments: Vec<Comment>,
}

impl PostView {
    fn new(post: &Post, viewer_id: Option<Uuid>) -> Self {
        Self {
            id: post.id,
            owner_id: post.owner_id,
            owner_email: post.owner_email.clone(),
            url: post.url.clone(),
            caption: post.caption.clone(),
            description: post.description.clone(),
            hashtags: post.hashtags.clone(),
            created_at: post.created_at,
            like_count: post.likes.len(),
            liked: viewer_id.is_some_and(|id| post.liked_by(id)),
            comments: post.comments_newest_first().into_iter().cloned().collect(),
        }
    }
}

fn viewer_id(state: &AppState) -> Option<Uuid> {
    state.viewer.as_ref().map(|viewer| viewer.id)
}

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let documents = state.documents.ping().await.is_ok();
    let status = if documents { "ok" } else { "degraded" };

    Json(HealthResponse { status })
}

#[derive(Deserialize)]
pub struct FeedFilter {
    pub hashtag: Option<String>,
}

pub async fn discover_feed(
    State(state): State<AppState>,
    Query(filter): Query<FeedFilter>,
) -> Json<ListResponse<PostView>> {
    let posts = state.store.posts(&FeedQuery::Discover);
    let posts = search(&posts, filter.hashtag.as_deref().unwrap_or_default());
    let viewer_id = viewer_id(&state);

    Json(ListResponse {
        items: posts
            .iter()
            .map(|post| PostView::new(post, viewer_id))
            .collect(),
    })
}

pub async fn gallery(
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
) -> Json<ListResponse<PostView>> {
    let posts = state.store.posts(&FeedQuery::Gallery {
        owner_id: viewer.id,
    });

    Json(ListResponse {
        items: posts
            .iter()
            .map(|post| PostView::new(post, Some(viewer.id)))
            .collect(),
    })
}

#[derive(Serialize)]
pub struct ViewResponse {
    pub post: Option<PostView>,
}

pub async fn current_view(State(state): State<AppState>) -> Json<ViewResponse> {
    let viewer_id = viewer_id(&state);
    Json(ViewResponse {
        post: state
            .store
            .selected()
            .map(|post| PostView::new(&post, viewer_id)),
    })
}

pub async fn open_view(
    Path(post_id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<PostView>, AppError> {
    let post = state
        .store
        .open_view(post_id)
        .ok_or_else(|| AppError::not_found("post not found"))?;

    Ok(Json(PostView::new(&post, viewer_id(&state))))
}

pub async fn close_view(State(state): State<AppState>) -> StatusCode {
    state.store.close_view();
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
pub struct LikeResponse {
    pub liked: bool,
    pub like_count: usize,
    pub overlapped: bool,
}

pub async fn toggle_like(
    Path(post_id): Path<Uuid>,
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<LikeResponse>), AppError> {
    let handle = state.engagement().toggle_like(&viewer, post_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(LikeResponse {
            liked: handle.next.contains(viewer.id),
            like_count: handle.next.len(),
            overlapped: handle.overlapped(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct CommentRequest {
    pub text: String,
}

#[derive(Serialize)]
pub struct CommentResponse {
    pub comment: Comment,
    pub overlapped: bool,
}

pub async fn add_comment(
    Path(post_id): Path<Uuid>,
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
    Json(payload): Json<CommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), AppError> {
    let (comment, handle) = state
        .engagement()
        .add_comment(&viewer, post_id, &payload.text)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(CommentResponse {
            comment,
            overlapped: handle.overlapped(),
        }),
    ))
}

#[derive(Serialize)]
pub struct MutationAccepted {
    pub overlapped: bool,
}

pub async fn delete_comment(
    Path((post_id, comment_id)): Path<(Uuid, Uuid)>,
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<MutationAccepted>), AppError> {
    let handle = state
        .engagement()
        .delete_comment(&viewer, post_id, comment_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(MutationAccepted {
            overlapped: handle.overlapped(),
        }),
    ))
}

#[derive(Deserialize)]
pub struct CreatePostRequest {
    /// Standard base64, no data-url prefix.
    pub image_base64: String,
    pub caption: String,
    pub description: Option<String>,
    pub hashtags: String,
}

pub async fn create_post(
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostView>), AppError> {
    let image = base64::engine::general_purpose::STANDARD
        .decode(payload.image_base64.trim())
        .map_err(|_| AppError::bad_request("image must be base64 encoded"))?;

    let post = state
        .posts()
        .upload(
            &viewer,
            NewPost {
                image: Bytes::from(image),
                caption: payload.caption,
                description: payload.description.unwrap_or_default(),
                hashtags: payload.hashtags,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(PostView::new(&post, Some(viewer.id)))))
}

pub async fn delete_post(
    Path(post_id): Path<Uuid>,
    SessionViewer(viewer): SessionViewer,
    State(state): State<AppState>,
) -> Result<StatusCode, AppError> {
    state.posts().delete(&viewer, post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Store changes as `store` events and rollbacks as `failure` events. The
/// stream ends when the session store closes.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let store_events = state.store.subscribe();
    let failures = state.failures.subscribe();

    let stream = stream::unfold(
        (store_events, failures),
        |(mut store_events, mut failures)| async move {
            let event = tokio::select! {
                biased;
                event = store_events.recv() => Event::default().event("store").json_data(event?),
                failure = failures.recv() => Event::default().event("failure").json_data(failure?),
            };
            Some((event, (store_events, failures)))
        },
    );

    Sse::new(stream).keep_alive(KeepAlive::default())
}

use axum::{routing::delete, routing::get, routing::post, Router};

use crate::AppState;
use crate::http::handlers;

pub fn health() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health))
}

pub fn feed() -> Router<AppState> {
    Router::new()
        .route("/feed", get(handlers::discover_feed))
        .route("/gallery", get(handlers::gallery))
}

pub fn view() -> Router<AppState> {
    Router::new()
        .route("/view", get(handlers::current_view))
        .route("/view/close", post(handlers::close_view))
        .route("/posts/:id/open", post(handlers::open_view))
}

pub fn posts() -> Router<AppState> {
    Router::new()
        .route("/posts", post(handlers::create_post))
        .route("/posts/:id", delete(handlers::delete_post))
        .route("/posts/:id/like", post(handlers::toggle_like))
        .route("/posts/:id/comments", post(handlers::add_comment))
        .route(
            "/posts/:id/comments/:comment_id",
            delete(handlers::delete_comment),
        )
}

pub fn events() -> Router<AppState> {
    Router::new().route("/events", get(handlers::events))
}

use axum::extract::DefaultBodyLimit;
use axum::Router;

use crate::AppState;

mod auth;
mod error;
mod handlers;
mod routes;

pub use auth::SessionViewer;
pub use error::AppError;

pub fn router(state: AppState) -> Router {
    // Uploads arrive base64 encoded, a third larger than the image itself.
    let body_limit = state.upload_max_bytes / 3 * 4 + 64 * 1024;

    let v1 = Router::new()
        .merge(routes::feed())
        .merge(routes::view())
        .merge(routes::posts())
        .merge(routes::events());

    Router::new()
        .merge(routes::health())
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::domain::user::Viewer;
use crate::http::AppError;
use crate::AppState;

/// The signed-in user of this session. Rejects with 401 when nobody is.
#[derive(Debug, Clone)]
pub struct SessionViewer(pub Viewer);

#[axum::async_trait]
impl FromRequestParts<AppState> for SessionViewer {
    type Rejection = AppError;

    async fn from_request_parts(
        _parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        state
            .viewer
            .clone()
            .map(SessionViewer)
            .ok_or_else(|| AppError::unauthorized("not signed in"))
    }
}

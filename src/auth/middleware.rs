use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use std::sync::Arc;

use crate::error::AppError;
use crate::state::AppState;

/// Session cookie name
pub const SESSION_COOKIE: &str = "bp_sess";

/// Resolve the session cookie and attach the [`Session`](super::Session)
/// to the request, or answer 401 `No session`
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    cookies: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    let session = cookies
        .get(SESSION_COOKIE)
        .and_then(|cookie| state.sessions.get(cookie.value()));

    match session {
        Some(session) => {
            request.extensions_mut().insert(session);
            next.run(request).await
        }
        None => AppError::Unauthorized.into_response(),
    }
}

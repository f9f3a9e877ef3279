use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::auth::{NewSession, SESSION_COOKIE};
use crate::error::{AppError, Result};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub base_url: Option<String>,
    pub access_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub allow_self_signed: Option<bool>,
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Non-empty, trimmed request value, else the configured default
fn or_default(value: Option<String>, fallback: &Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.clone().filter(|v| !v.is_empty()))
}

fn forwarded_https(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    cookies: CookieJar,
    payload: std::result::Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<(CookieJar, Json<OkResponse>)> {
    let Json(req) = payload.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let defaults = &state.config.protect;

    let base_url = or_default(req.base_url, &defaults.base_url)
        .ok_or_else(|| AppError::BadRequest("baseUrl required".to_string()))?;
    let access_key = or_default(req.access_key, &defaults.access_key);
    let username = or_default(req.username, &defaults.username);
    let password = or_default(req.password, &defaults.password);

    if access_key.is_none() && (username.is_none() || password.is_none()) {
        return Err(AppError::BadRequest(
            "accessKey or username/password required".to_string(),
        ));
    }

    let session = state.sessions.create(NewSession {
        base_url,
        access_key,
        username,
        password,
        allow_self_signed: req.allow_self_signed.unwrap_or(defaults.allow_self_signed),
    });
    info!(base_url = %session.base_url, username = ?session.username, "Session created");

    let cookie = Cookie::build((SESSION_COOKIE, session.id))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(forwarded_https(&headers))
        .max_age(time::Duration::seconds(
            state.sessions.ttl().as_secs() as i64,
        ))
        .build();

    Ok((cookies.add(cookie), Json(OkResponse { ok: true })))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    cookies: CookieJar,
) -> (CookieJar, Json<OkResponse>) {
    if let Some(cookie) = cookies.get(SESSION_COOKIE) {
        if state.sessions.delete(cookie.value()) {
            info!("Session deleted");
        }
    }

    let cookie = Cookie::build((SESSION_COOKIE, "")).path("/").build();
    (cookies.remove(cookie), Json(OkResponse { ok: true }))
}

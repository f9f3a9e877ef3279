pub mod cameras;
pub mod session;
pub mod stream;

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::monitor::MemorySnapshot;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub build_date: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("BUILD_DATE"),
    })
}

/// Login form defaults. The password itself is never returned.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvDefaults {
    pub base_url: String,
    pub username: String,
    pub has_password: bool,
    pub has_access_key: bool,
    pub allow_self_signed: bool,
}

pub async fn env_defaults(State(state): State<Arc<AppState>>) -> Json<EnvDefaults> {
    let protect = &state.config.protect;
    Json(EnvDefaults {
        base_url: protect.base_url.clone().unwrap_or_default(),
        username: protect.username.clone().unwrap_or_default(),
        has_password: protect.password.as_deref().is_some_and(|p| !p.is_empty()),
        has_access_key: protect.access_key.as_deref().is_some_and(|k| !k.is_empty()),
        allow_self_signed: protect.allow_self_signed,
    })
}

#[derive(Serialize)]
pub struct CacheStats {
    pub sessions: usize,
    pub connections: usize,
    pub bootstraps: usize,
    pub codecs: usize,
    pub streams: usize,
}

#[derive(Serialize)]
pub struct MemoryResponse {
    pub memory: MemorySnapshot,
    pub caches: CacheStats,
    pub timestamp: String,
}

pub async fn system_memory(State(state): State<Arc<AppState>>) -> Json<MemoryResponse> {
    Json(MemoryResponse {
        memory: MemorySnapshot::current(),
        caches: CacheStats {
            sessions: state.sessions.len(),
            connections: state.connections.len(),
            bootstraps: state.connections.bootstrap_cache_len(),
            codecs: state.codecs.len(),
            streams: state.streams.len(),
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

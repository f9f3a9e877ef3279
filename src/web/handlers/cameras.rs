use axum::{extract::State, Extension, Json};
use std::sync::Arc;

use crate::auth::Session;
use crate::error::Result;
use crate::protect::{Bootstrap, CameraSummary};
use crate::state::AppState;

pub async fn list_cameras(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Vec<CameraSummary>>> {
    let creds = session.credentials()?;
    let bootstrap = state.connections.bootstrap(&creds).await?;

    let cameras = bootstrap
        .cameras()
        .iter()
        .filter_map(CameraSummary::from_camera)
        .collect();
    Ok(Json(cameras))
}

pub async fn get_bootstrap(
    State(state): State<Arc<AppState>>,
    Extension(session): Extension<Session>,
) -> Result<Json<Bootstrap>> {
    let creds = session.credentials()?;
    let bootstrap = state.connections.bootstrap(&creds).await?;
    Ok(Json(Bootstrap::clone(&bootstrap)))
}

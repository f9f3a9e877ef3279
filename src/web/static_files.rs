use axum::{
    body::Body,
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use rust_embed::Embed;

/// Embedded viewer UI
#[derive(Embed)]
#[folder = "web/"]
pub struct StaticAssets;

/// Serve an embedded asset, falling back to the viewer page for
/// extension-less paths
pub async fn static_handler(uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };

    if let Some(response) = serve_asset(path) {
        return response;
    }
    if !path.contains('.') {
        if let Some(response) = serve_asset("index.html") {
            return response;
        }
    }

    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

fn serve_asset(path: &str) -> Option<Response> {
    let asset = StaticAssets::get(path)?;
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .to_string();

    Some(
        (
            [
                (header::CONTENT_TYPE, mime),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
            Body::from(asset.data.into_owned()),
        )
            .into_response(),
    )
}

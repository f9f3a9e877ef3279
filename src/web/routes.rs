use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::static_files::static_handler;
use crate::auth::auth_middleware;
use crate::error::AppError;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no session required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/env", get(handlers::env_defaults))
        .route("/system/memory", get(handlers::system_memory))
        .route(
            "/session",
            post(handlers::session::create_session).delete(handlers::session::delete_session),
        );

    // Routes that resolve the session cookie first
    let protected_routes = Router::new()
        .route("/cameras", get(handlers::cameras::list_cameras))
        .route("/bootstrap", get(handlers::cameras::get_bootstrap))
        .route("/stream/:camera_id/codec", get(handlers::stream::stream_codec))
        .route("/stream/:camera_id", get(handlers::stream::stream_camera))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(|| async { AppError::NotFound("Not found".to_string()) });

    Router::new()
        .nest("/api", api_routes)
        .fallback(static_handler)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::protect::fmp4::tests::{sample_init, sample_media};
    use crate::protect::mock::{MockLivestream, MockNvr};
    use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE, COOKIE, SET_COOKIE};
    use reqwest::StatusCode;
    use serde_json::{json, Value};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct TestApp {
        base: String,
        state: Arc<AppState>,
        nvr: Arc<MockNvr>,
        http: reqwest::Client,
    }

    impl TestApp {
        async fn spawn() -> Self {
            Self::spawn_with(AppConfig::default()).await
        }

        async fn spawn_with(mut config: AppConfig) -> Self {
            config.protect.settle_delay_ms = 0;
            let nvr = MockNvr::new();
            let state = AppState::new(config, nvr.connector());
            let app = create_router(state.clone());

            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });

            Self {
                base: format!("http://{}", addr),
                state,
                nvr,
                http: reqwest::Client::new(),
            }
        }

        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }

        /// POST a session and return the `name=value` cookie pair
        async fn login(&self, body: Value) -> String {
            let response = self
                .http
                .post(self.url("/api/session"))
                .json(&body)
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            session_cookie(&response).unwrap()
        }

        async fn password_session(&self) -> String {
            self.login(json!({
                "baseUrl": "https://10.0.0.1",
                "username": "admin",
                "password": "hunter2",
                "allowSelfSigned": true
            }))
            .await
        }

        async fn get(&self, path: &str, cookie: &str) -> reqwest::Response {
            self.http
                .get(self.url(path))
                .header(COOKIE, cookie)
                .send()
                .await
                .unwrap()
        }

        fn viewer_streams(&self) -> Vec<Arc<MockLivestream>> {
            self.nvr
                .livestreams
                .lock()
                .iter()
                .filter(|s| s.started.load(Ordering::SeqCst))
                .cloned()
                .collect()
        }
    }

    fn session_cookie(response: &reqwest::Response) -> Option<String> {
        response
            .headers()
            .get(SET_COOKIE)?
            .to_str()
            .ok()?
            .split(';')
            .next()
            .map(str::to_string)
    }

    async fn error_of(response: reqwest::Response) -> (StatusCode, String) {
        let status = response.status();
        let body: Value = response.json().await.unwrap();
        (status, body["error"].as_str().unwrap_or_default().to_string())
    }

    /// Read body chunks until at least `len` bytes arrived
    async fn read_at_least(response: &mut reqwest::Response, buf: &mut Vec<u8>, len: usize) {
        while buf.len() < len {
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .expect("timed out waiting for stream data")
                .unwrap()
                .expect("stream ended early");
            buf.extend_from_slice(&chunk);
        }
    }

    #[tokio::test]
    async fn test_session_cookie_attributes() {
        let app = TestApp::spawn().await;
        let response = app
            .http
            .post(app.url("/api/session"))
            .json(&json!({ "baseUrl": "https://10.0.0.1", "accessKey": "key" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(set_cookie.starts_with("bp_sess="));
        assert!(set_cookie.contains("HttpOnly"));
        assert!(set_cookie.contains("SameSite=Lax"));
        assert!(set_cookie.contains("Path=/"));
        assert!(set_cookie.contains("Max-Age=3600"));
        assert!(!set_cookie.contains("Secure"));

        let token = set_cookie["bp_sess=".len()..].split(';').next().unwrap();
        assert_eq!(token.len(), 32);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body, json!({ "ok": true }));
        assert_eq!(app.state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_secure_cookie_behind_https_proxy() {
        let app = TestApp::spawn().await;
        let response = app
            .http
            .post(app.url("/api/session"))
            .header("x-forwarded-proto", "https")
            .json(&json!({ "baseUrl": "https://10.0.0.1", "accessKey": "key" }))
            .send()
            .await
            .unwrap();
        let set_cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(set_cookie.contains("Secure"));
    }

    #[tokio::test]
    async fn test_session_validation() {
        let app = TestApp::spawn().await;

        let missing_url = app
            .http
            .post(app.url("/api/session"))
            .json(&json!({ "username": "admin", "password": "pw" }))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(missing_url).await,
            (StatusCode::BAD_REQUEST, "baseUrl required".to_string())
        );

        let missing_creds = app
            .http
            .post(app.url("/api/session"))
            .json(&json!({ "baseUrl": "https://10.0.0.1", "username": "admin" }))
            .send()
            .await
            .unwrap();
        assert_eq!(
            error_of(missing_creds).await,
            (
                StatusCode::BAD_REQUEST,
                "accessKey or username/password required".to_string()
            )
        );

        let malformed = app
            .http
            .post(app.url("/api/session"))
            .header(CONTENT_TYPE, "application/json")
            .body("{ nope")
            .send()
            .await
            .unwrap();
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        assert!(app.state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_session_falls_back_to_configured_defaults() {
        let mut config = AppConfig::default();
        config.protect.base_url = Some("https://10.0.0.1".into());
        config.protect.username = Some("admin".into());
        config.protect.password = Some("hunter2".into());
        let app = TestApp::spawn_with(config).await;

        let cookie = app.login(json!({})).await;
        let cameras = app.get("/api/cameras", &cookie).await;
        assert_eq!(cameras.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_protected_routes_require_session() {
        let app = TestApp::spawn().await;

        let protected = [
            "/api/cameras",
            "/api/bootstrap",
            "/api/stream/cam1",
            "/api/stream/cam1/codec",
        ];
        for path in protected {
            let response = app.http.get(app.url(path)).send().await.unwrap();
            assert_eq!(
                error_of(response).await,
                (StatusCode::UNAUTHORIZED, "No session".to_string()),
                "{}",
                path
            );
        }

        let stale = app
            .get("/api/cameras", "bp_sess=0123456789abcdef0123456789abcdef")
            .await;
        assert_eq!(stale.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_deleted_session_is_rejected() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;
        assert_eq!(app.get("/api/cameras", &cookie).await.status(), StatusCode::OK);

        let response = app
            .http
            .delete(app.url("/api/session"))
            .header(COOKIE, &cookie)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cleared = response.headers()[SET_COOKIE].to_str().unwrap().to_string();
        assert!(cleared.starts_with("bp_sess="));
        assert!(cleared.contains("Max-Age=0"));

        assert_eq!(
            error_of(app.get("/api/cameras", &cookie).await).await,
            (StatusCode::UNAUTHORIZED, "No session".to_string())
        );
    }

    #[tokio::test]
    async fn test_access_key_session_lacks_login_credentials() {
        let app = TestApp::spawn().await;
        let cookie = app
            .login(json!({ "baseUrl": "https://10.0.0.1", "accessKey": "key" }))
            .await;

        assert_eq!(
            error_of(app.get("/api/cameras", &cookie).await).await,
            (
                StatusCode::BAD_REQUEST,
                "Invalid session: missing credentials".to_string()
            )
        );
        assert_eq!(app.nvr.logins(), 0);
    }

    #[tokio::test]
    async fn test_list_cameras_and_bootstrap() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;

        let cameras: Value = app.get("/api/cameras", &cookie).await.json().await.unwrap();
        assert_eq!(
            cameras,
            json!([
                { "id": "cam1", "name": "Front Door", "isOnline": true },
                { "id": "cam2", "name": "Garage", "isOnline": false }
            ])
        );

        let bootstrap: Value = app.get("/api/bootstrap", &cookie).await.json().await.unwrap();
        assert_eq!(bootstrap["cameras"].as_array().unwrap().len(), 2);
        assert_eq!(bootstrap["nvr"]["name"], "UNVR");

        // One login and one snapshot served both requests
        assert_eq!(app.nvr.logins(), 1);
        assert_eq!(app.nvr.bootstrap_fetches(), 1);
        assert!(app.nvr.connect_options.lock()[0].allow_self_signed);
    }

    #[tokio::test]
    async fn test_codec_is_probed_once() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;

        for _ in 0..2 {
            let response = app.get("/api/stream/cam1/codec", &cookie).await;
            assert_eq!(response.status(), StatusCode::OK);
            let body: Value = response.json().await.unwrap();
            assert_eq!(body, json!({ "codec": "avc1.4d401f,mp4a.40.2" }));
        }

        let probes = app.viewer_streams();
        assert_eq!(probes.len(), 1);
        assert!(probes[0].is_stopped());
        assert_eq!(app.state.codecs.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_camera() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;

        for path in ["/api/stream/nope/codec", "/api/stream/nope"] {
            assert_eq!(
                error_of(app.get(path, &cookie).await).await,
                (StatusCode::NOT_FOUND, "Camera not found".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_refused_livestream() {
        let app = TestApp::spawn().await;
        app.nvr.livestream_accepts.store(false, Ordering::SeqCst);
        let cookie = app.password_session().await;

        assert_eq!(
            error_of(app.get("/api/stream/cam1", &cookie).await).await,
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to start livestream".to_string()
            )
        );
        assert!(app.state.streams.is_empty());
    }

    #[tokio::test]
    async fn test_stream_relays_fragments_and_stops_on_disconnect() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;

        let mut response = app.get("/api/stream/cam1", &cookie).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(response.headers()["pragma"], "no-cache");
        assert_eq!(response.headers()["expires"], "0");

        let init = sample_init();
        let media = sample_media(1);
        let mut received = Vec::new();
        read_at_least(&mut response, &mut received, init.len()).await;
        assert_eq!(&received[..init.len()], &init[..]);

        let upstream = app.viewer_streams();
        assert_eq!(upstream.len(), 1);
        let upstream = upstream[0].clone();
        assert_eq!(upstream.camera_id.lock().as_deref(), Some("cam1"));
        assert!(upstream.push(&media) >= 1);

        read_at_least(&mut response, &mut received, init.len() + media.len()).await;
        assert_eq!(&received[init.len()..init.len() + media.len()], &media[..]);
        assert_eq!(app.state.streams.len(), 1);

        drop(response);

        // The server notices the disconnect on its next write
        let mut released = false;
        for _ in 0..100 {
            upstream.push(&media);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if upstream.is_stopped() && app.state.streams.is_empty() {
                released = true;
                break;
            }
        }
        assert!(released, "upstream was not released after disconnect");
    }

    #[tokio::test]
    async fn test_concurrent_viewers_share_upstream() {
        let app = TestApp::spawn().await;
        let cookie = app.password_session().await;
        // Warm the connection so both requests race only on the stream
        app.get("/api/cameras", &cookie).await;

        let (a, b) = tokio::join!(
            app.get("/api/stream/cam1", &cookie),
            app.get("/api/stream/cam1", &cookie)
        );
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);

        assert_eq!(app.viewer_streams().len(), 1);
        assert_eq!(app.state.streams.len(), 1);
    }

    #[tokio::test]
    async fn test_public_routes() {
        let mut config = AppConfig::default();
        config.protect.base_url = Some("https://192.168.1.1".into());
        config.protect.username = Some("viewer".into());
        config.protect.password = Some("secret".into());
        let app = TestApp::spawn_with(config).await;

        let health: Value = app
            .http
            .get(app.url("/api/health"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));

        let env = app
            .http
            .get(app.url("/api/env"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(!env.contains("secret"));
        let env: Value = serde_json::from_str(&env).unwrap();
        assert_eq!(env["baseUrl"], "https://192.168.1.1");
        assert_eq!(env["username"], "viewer");
        assert_eq!(env["hasPassword"], true);
        assert_eq!(env["allowSelfSigned"], false);

        let memory: Value = app
            .http
            .get(app.url("/api/system/memory"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(memory["memory"]["rssMb"].is_u64());
        assert_eq!(memory["caches"]["sessions"], 0);
        assert!(memory["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_static_ui_and_unknown_api_route() {
        let app = TestApp::spawn().await;

        let index = app.http.get(app.url("/")).send().await.unwrap();
        assert_eq!(index.status(), StatusCode::OK);
        assert!(index.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(index.text().await.unwrap().contains("MediaSource"));

        let missing = app.http.get(app.url("/api/nope")).send().await.unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}

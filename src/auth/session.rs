use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::RngCore;
use tokio::time::Instant;

use crate::connection::Credentials;
use crate::error::AppError;

/// Connection details submitted by the viewer
#[derive(Clone, Default)]
pub struct NewSession {
    pub base_url: String,
    pub access_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub allow_self_signed: bool,
}

/// Server-side record bound to the session cookie
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub base_url: String,
    pub access_key: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub allow_self_signed: bool,
    pub created_at: DateTime<Utc>,
    expires_at: Instant,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Username/password login material for the connection cache.
    ///
    /// An access key alone is accepted at session creation but cannot log in.
    pub fn credentials(&self) -> Result<Credentials, AppError> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Ok(Credentials {
                    base_url: self.base_url.clone(),
                    username: username.clone(),
                    password: password.clone(),
                    allow_self_signed: self.allow_self_signed,
                })
            }
            _ => Err(AppError::MissingCredentials),
        }
    }
}

// Secrets stay out of logs
impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .field("has_access_key", &self.access_key.is_some())
            .field("allow_self_signed", &self.allow_self_signed)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// In-memory session store. Sessions do not survive a restart.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create a session under a fresh random token
    pub fn create(&self, params: NewSession) -> Session {
        let session = Session {
            id: generate_token(),
            base_url: params.base_url,
            access_key: params.access_key,
            username: params.username,
            password: params.password,
            allow_self_signed: params.allow_self_signed,
            created_at: Utc::now(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Look up a live session, dropping it if it has expired
    pub fn get(&self, session_id: &str) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        match sessions.get(session_id) {
            Some(session) if !session.is_expired() => Some(session.clone()),
            Some(_) => {
                sessions.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Returns whether a session was removed
    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.lock().remove(session_id).is_some()
    }

    /// Drop every expired session, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 16 random bytes, hex encoded
fn generate_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn password_session() -> NewSession {
        NewSession {
            base_url: "https://10.0.0.1".into(),
            username: Some("admin".into()),
            password: Some("hunter2".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(token, generate_token());
    }

    #[tokio::test]
    async fn test_create_get_delete() {
        let store = SessionStore::new(Duration::from_secs(3600));
        let session = store.create(password_session());

        let found = store.get(&session.id).unwrap();
        assert_eq!(found.base_url, "https://10.0.0.1");
        assert_eq!(found.username.as_deref(), Some("admin"));

        assert!(store.delete(&session.id));
        assert!(store.get(&session.id).is_none());
        assert!(!store.delete(&session.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_expire() {
        let store = SessionStore::new(Duration::from_secs(3600));
        let first = store.create(password_session());

        advance(Duration::from_secs(1800)).await;
        let second = store.create(password_session());
        assert_eq!(store.len(), 2);

        advance(Duration::from_secs(1800)).await;
        assert!(store.get(&first.id).is_none());
        assert!(store.get(&second.id).is_some());

        advance(Duration::from_secs(1800)).await;
        assert_eq!(store.cleanup_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_credentials_require_username_and_password() {
        let store = SessionStore::new(Duration::from_secs(60));

        let full = store.create(password_session());
        let creds = full.credentials().unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "hunter2");

        let key_only = store.create(NewSession {
            base_url: "https://10.0.0.1".into(),
            access_key: Some("key".into()),
            ..Default::default()
        });
        assert!(matches!(
            key_only.credentials(),
            Err(AppError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_debug_redacts_secrets() {
        let store = SessionStore::new(Duration::from_secs(60));
        let mut params = password_session();
        params.access_key = Some("secret-key".into());
        let rendered = format!("{:?}", store.create(params));

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("has_password: true"));
    }
}

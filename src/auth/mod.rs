mod session;
pub mod middleware;

pub use middleware::{auth_middleware, SESSION_COOKIE};
pub use session::{NewSession, Session, SessionStore};

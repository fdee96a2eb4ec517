//! OpenID Connect authentication
//!
//! Handles:
//! - Sign-in via the identity provider
//! - Session management
//! - Authentication middleware

mod middleware;
pub mod oidc;
mod routes;
pub mod session;

pub use middleware::{CurrentUser, MaybeUser, SESSION_COOKIE, require_login, require_session};
pub use oidc::{AuthorizationRequest, IdentityClaims, IdentityProvider, OidcProvider, PendingLogin};
pub use routes::{CALLBACK_PATH, auth_router};
pub use session::{AuthFlow, Session, SessionId, SessionStore, sign_session_id, verify_session_cookie};

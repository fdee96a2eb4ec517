//! Session management
//!
//! Sessions live server-side in a [`SessionStore`] keyed by a random id.
//! The browser only holds the id, signed with HMAC-SHA256 so a forged or
//! tampered cookie never reaches the store.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::oidc::{IdentityClaims, PendingLogin};
use crate::error::AppError;
use crate::metrics::SESSIONS_ACTIVE;

/// Opaque session identifier (32 random bytes, base64url)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        use base64::{Engine as _, engine::general_purpose};
        use rand::RngCore;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(general_purpose::URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where a session is in the sign-in flow
#[derive(Debug, Clone)]
pub enum AuthFlow {
    /// No sign-in attempted, or the last one was abandoned
    Anonymous,
    /// Redirected to the provider; waiting for the callback
    PendingCallback(PendingLogin),
    /// Provider confirmed the user's identity
    Authenticated(IdentityClaims),
}

/// Server-side session record
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub flow: AuthFlow,
    /// Page to return to after sign-in
    pub return_to: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    fn new(max_age: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::generate(),
            flow: AuthFlow::Anonymous,
            return_to: None,
            created_at: now,
            expires_at: expiry_after(now, max_age),
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.flow, AuthFlow::Authenticated(_))
    }

    pub fn identity(&self) -> Option<&IdentityClaims> {
        match &self.flow {
            AuthFlow::Authenticated(claims) => Some(claims),
            _ => None,
        }
    }

    /// Start (or restart) a sign-in from any state.
    pub fn begin_login(&mut self, pending: PendingLogin) {
        self.flow = AuthFlow::PendingCallback(pending);
    }

    /// Consume the pending sign-in if `state` matches its CSRF token.
    ///
    /// The session drops back to `Anonymous` either way, so a callback can
    /// only be redeemed once.
    pub fn take_pending(&mut self, state: &str) -> Result<PendingLogin, AppError> {
        match std::mem::replace(&mut self.flow, AuthFlow::Anonymous) {
            AuthFlow::PendingCallback(pending) if pending.csrf_token == state => Ok(pending),
            AuthFlow::PendingCallback(_) => {
                tracing::warn!("Sign-in callback state does not match the pending login");
                Err(AppError::Unauthorized)
            }
            other => {
                self.flow = other;
                Err(AppError::Unauthorized)
            }
        }
    }

    pub fn authenticate(&mut self, claims: IdentityClaims) {
        self.flow = AuthFlow::Authenticated(claims);
    }
}

/// Saturates at the latest representable instant
fn expiry_after(now: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    now.checked_add_signed(max_age)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// In-process session store
///
/// Holds every live session for the lifetime of the process. Expired
/// records are invisible to [`SessionStore::load`] and removed by
/// [`SessionStore::purge_expired`].
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    max_age: Duration,
}

impl SessionStore {
    pub fn new(max_age_seconds: i64) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_age: Duration::try_seconds(max_age_seconds).unwrap_or_else(Duration::max_value),
        }
    }

    /// Build a fresh anonymous session; it is not stored until saved.
    pub fn create(&self) -> Session {
        Session::new(self.max_age)
    }

    pub async fn load(&self, id: &SessionId) -> Option<Session> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .filter(|session| !session.is_expired())
            .cloned()
    }

    pub async fn save(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session);
        SESSIONS_ACTIVE.set(sessions.len() as i64);
    }

    pub async fn remove(&self, id: &SessionId) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        SESSIONS_ACTIVE.set(sessions.len() as i64);
    }

    /// Give a session a new id, dropping the old one.
    ///
    /// Used when a sign-in completes so an id issued before authentication
    /// never names an authenticated session.
    pub async fn rotate(&self, mut session: Session) -> Session {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&session.id);
        session.id = SessionId::generate();
        session.expires_at = expiry_after(Utc::now(), self.max_age);
        sessions.insert(session.id.clone(), session.clone());
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        session
    }

    /// Remove expired sessions, returning how many were dropped
    pub async fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired());
        SESSIONS_ACTIVE.set(sessions.len() as i64);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Sign a session id for the cookie
///
/// Cookie format: id.base64(hmac_sha256(id))
pub fn sign_session_id(id: &SessionId, secret: &str) -> Result<String, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(id.as_str().as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);

    Ok(format!("{}.{}", id.as_str(), signature_b64))
}

/// Verify a signed cookie value and return the session id it names
///
/// # Errors
/// Returns `Unauthorized` if the value is malformed or the signature is wrong
pub fn verify_session_cookie(value: &str, secret: &str) -> Result<SessionId, AppError> {
    use base64::{Engine as _, engine::general_purpose};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let (id, signature_b64) = value.split_once('.').ok_or(AppError::Unauthorized)?;
    if id.is_empty() {
        return Err(AppError::Unauthorized);
    }

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Encryption(e.to_string()))?;
    mac.update(id.as_bytes());

    let signature = general_purpose::URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| AppError::Unauthorized)?;

    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    Ok(SessionId(id.to_string()))
}

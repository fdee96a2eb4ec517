//! Sign-in flow routes
//!
//! Implements the OpenID Connect authorization code flow against the
//! configured identity provider.

use axum::{
    Router,
    extract::{Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect},
    routing::get,
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;

use super::middleware::{load_session, removal_cookie, session_cookie};
use crate::AppState;
use crate::error::AppError;
use crate::metrics::SIGN_INS_TOTAL;

/// Callback path registered with the identity provider
pub const CALLBACK_PATH: &str = "/authorization-code/callback";

/// Create authentication router
///
/// Routes:
/// - GET /login - Redirect to the identity provider
/// - GET /authorization-code/callback - Complete sign-in
/// - GET|POST /logout - Sign out
pub fn auth_router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login))
        .route(CALLBACK_PATH, get(callback))
        .route("/logout", get(logout).post(logout))
}

// =============================================================================
// Login
// =============================================================================

/// Query parameters accepted by /login
#[derive(Debug, Default, Deserialize)]
struct LoginQuery {
    /// Local path to return to after sign-in
    return_to: Option<String>,
}

/// GET /login
///
/// # Steps
/// 1. Load the caller's session, or start a new one
/// 2. Generate CSRF state, PKCE verifier and nonce
/// 3. Store them and `return_to` in the session (PendingCallback)
/// 4. Redirect to the provider's authorization endpoint
async fn login(
    State(state): State<AppState>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let request = state.identity.authorization_request();

    let mut session = match load_session(&headers, &state).await {
        Some(session) => session,
        None => state.sessions.create(),
    };
    session.return_to = query.return_to.filter(|path| is_local_path(path));
    session.begin_login(request.pending);

    let cookie = session_cookie(&session, &state)?;
    state.sessions.save(session).await;

    Ok((jar.add(cookie), Redirect::to(&request.url)))
}

// =============================================================================
// Callback
// =============================================================================

/// Query parameters from the provider callback
#[derive(Debug, Deserialize)]
struct CallbackQuery {
    /// Authorization code
    code: Option<String>,
    /// CSRF state token
    state: Option<String>,
    /// Provider-reported failure
    error: Option<String>,
    error_description: Option<String>,
}

/// GET /authorization-code/callback
///
/// # Steps
/// 1. Consume the pending login whose CSRF token matches `state`
/// 2. Exchange the code for verified identity claims
/// 3. Rotate the session id and mark the session authenticated
/// 4. Redirect to the page that asked for sign-in, or the default
async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let mut session = load_session(&headers, &state)
        .await
        .ok_or(AppError::Unauthorized)?;

    let pending = session.take_pending(query.state.as_deref().unwrap_or_default());
    // Whatever happens next, the pending login has been used up
    state.sessions.save(session.clone()).await;
    let pending = pending?;

    if let Some(error) = query.error {
        SIGN_INS_TOTAL.with_label_values(&["provider_error"]).inc();
        tracing::error!(
            error = %error,
            description = ?query.error_description,
            "Identity provider rejected sign-in"
        );
        return Err(AppError::Identity(error));
    }

    let code = query
        .code
        .ok_or_else(|| AppError::Validation("missing authorization code".to_string()))?;

    let claims = match state.identity.exchange_code(&code, &pending).await {
        Ok(claims) => claims,
        Err(error) => {
            SIGN_INS_TOTAL.with_label_values(&["exchange_failed"]).inc();
            tracing::error!(%error, "Authorization code exchange failed");
            return Err(error);
        }
    };

    tracing::info!(
        subject = %claims.subject,
        issuer = %claims.issuer,
        "User signed in"
    );
    SIGN_INS_TOTAL.with_label_values(&["success"]).inc();

    session.authenticate(claims);
    let destination = session
        .return_to
        .take()
        .filter(|path| is_local_path(path))
        .unwrap_or_else(|| state.config.oidc.default_redirect.clone());

    let session = state.sessions.rotate(session).await;
    let cookie = session_cookie(&session, &state)?;

    Ok((jar.add(cookie), Redirect::to(&destination)))
}

// =============================================================================
// Logout
// =============================================================================

/// GET /logout
///
/// Drops the server-side session, clears the cookie and redirects home.
async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> impl IntoResponse {
    if let Some(session) = load_session(&headers, &state).await {
        if let Some(identity) = session.identity() {
            tracing::info!(subject = %identity.subject, "User signed out");
        }
        state.sessions.remove(&session.id).await;
    }

    (jar.add(removal_cookie()), Redirect::to("/home"))
}

// =============================================================================
// Helpers
// =============================================================================

/// Only same-origin absolute paths are valid redirect targets
fn is_local_path(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}

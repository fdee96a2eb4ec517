//! Authentication middleware
//!
//! Two guards share one session lookup:
//! - [`require_login`] for browser pages, which redirects to sign-in
//! - [`require_session`] for the API, which answers 401

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};

use super::oidc::IdentityClaims;
use super::session::{Session, sign_session_id, verify_session_cookie};
use crate::AppState;
use crate::error::AppError;

/// Session cookie name
pub const SESSION_COOKIE: &str = "session";

/// Signed session id from the `session` cookie; other credentials are ignored
fn extract_session_cookie(headers: &HeaderMap) -> Option<String> {
    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_owned())
}

/// Load the live session named by the request, if any.
///
/// Unsigned, forged and expired cookies all read as "no session".
pub(crate) async fn load_session(headers: &HeaderMap, state: &AppState) -> Option<Session> {
    let token = extract_session_cookie(headers)?;
    let id = verify_session_cookie(&token, &state.config.auth.session_secret).ok()?;
    state.sessions.load(&id).await
}

/// Build the cookie carrying a session's signed id
pub(crate) fn session_cookie(
    session: &Session,
    state: &AppState,
) -> Result<Cookie<'static>, AppError> {
    let value = sign_session_id(&session.id, &state.config.auth.session_secret)?;
    Ok(Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(state.config.should_use_secure_cookies())
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(state.config.auth.session_max_age))
        .build())
}

/// Cookie that tells the browser to forget its session
pub(crate) fn removal_cookie() -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, ""))
        .path("/")
        .max_age(time::Duration::ZERO)
        .build()
}

/// Middleware for API routes
///
/// Responds 401 unless the request carries an authenticated session.
/// Adds the Session to request extensions when it does.
///
/// # Usage
/// ```ignore
/// let protected_routes = Router::new()
///     .route("/posts", ...)
///     .route_layer(middleware::from_fn_with_state(state, require_session));
/// ```
pub async fn require_session(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = load_session(request.headers(), &state)
        .await
        .filter(Session::is_authenticated)
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(session);
    Ok(next.run(request).await)
}

/// Middleware for browser pages
///
/// Without an authenticated session the browser is sent to `/login`, with the
/// requested path in `return_to`. No session is created here.
pub async fn require_login(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(session) = load_session(request.headers(), &state)
        .await
        .filter(Session::is_authenticated)
    {
        request.extensions_mut().insert(session);
        return next.run(request).await;
    }

    let requested = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| request.uri().path().to_owned());

    tracing::debug!(path = %request.uri().path(), "Redirecting unauthenticated request to sign-in");
    Redirect::to(&login_location(&requested)).into_response()
}

/// `/login` URL that returns to `path` after sign-in
pub(crate) fn login_location(path: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("return_to", path)
        .finish();
    format!("/login?{query}")
}

/// Extractor for the current authenticated user
///
/// Use in handlers to get the identity behind the session.
///
/// # Usage
/// ```ignore
/// async fn handler(
///     CurrentUser(identity): CurrentUser,
/// ) -> impl IntoResponse {
///     format!("Hello, {}", identity.subject)
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentUser(pub IdentityClaims);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let MaybeUser(identity) = MaybeUser::from_request_parts(parts, state)
            .await
            .unwrap_or(MaybeUser(None));
        identity.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}

/// Optional current user extractor
///
/// The "is authenticated" predicate for handlers that branch instead of
/// forcing a sign-in. Returns None if not authenticated.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<IdentityClaims>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<Session>() {
            return Ok(MaybeUser(session.identity().cloned()));
        }

        let app_state = AppState::from_ref(state);
        let session = load_session(&parts.headers, &app_state).await;
        let identity = session.as_ref().and_then(Session::identity).cloned();

        if let Some(session) = session {
            parts.extensions.insert(session);
        }

        Ok(MaybeUser(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_location_encodes_return_path() {
        assert_eq!(login_location("/admin"), "/login?return_to=%2Fadmin");
        assert_eq!(
            login_location("/admin?tab=drafts&x=1"),
            "/login?return_to=%2Fadmin%3Ftab%3Ddrafts%26x%3D1"
        );
    }

    #[test]
    fn only_the_session_cookie_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer unrelated-token".parse().unwrap());
        assert_eq!(extract_session_cookie(&headers), None);

        headers.insert("cookie", "theme=dark; session=abc.def".parse().unwrap());
        assert_eq!(extract_session_cookie(&headers).as_deref(), Some("abc.def"));
    }
}

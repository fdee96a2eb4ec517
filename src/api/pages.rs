//! Browser pages
//!
//! Static landing and admin pages. Only the admin page needs a signed-in
//! session.

use axum::{
    Router, middleware,
    response::Redirect,
    routing::{get, get_service},
};
use tower_http::services::ServeFile;

use crate::AppState;
use crate::auth::require_login;

/// Create pages router
///
/// Routes:
/// - GET / - Redirect to /home
/// - GET /home - Landing page
/// - GET /admin - Admin page (sign-in required)
pub fn pages_router(state: AppState) -> Router<AppState> {
    let static_dir = state.config.web.static_dir.clone();

    let admin = Router::new()
        .route(
            "/admin",
            get_service(ServeFile::new(static_dir.join("admin.html"))),
        )
        .route_layer(middleware::from_fn_with_state(state, require_login));

    Router::new()
        .route("/", get(root))
        .route(
            "/home",
            get_service(ServeFile::new(static_dir.join("home.html"))),
        )
        .merge(admin)
}

/// GET /
async fn root() -> Redirect {
    Redirect::to("/home")
}

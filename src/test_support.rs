//! Shared fixtures for unit tests

use std::path::Path;
use std::sync::Arc;

use crate::AppState;
use crate::auth::IdentityProvider;
use crate::config::{
    AppConfig, AuthConfig, DatabaseConfig, LoggingConfig, OidcConfig, ServerConfig, WebConfig,
};

pub(crate) fn test_config(dir: &Path) -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            domain: "localhost".to_string(),
            protocol: "http".to_string(),
        },
        database: DatabaseConfig {
            path: dir.join("test.db"),
        },
        oidc: OidcConfig {
            org_url: "https://idp.test".to_string(),
            authorization_server: "default".to_string(),
            client_id: "test-client-id".to_string(),
            client_secret: "test-client-secret".to_string(),
            redirect_url: "http://localhost/authorization-code/callback".to_string(),
            scopes: "openid profile".to_string(),
            default_redirect: "/admin".to_string(),
        },
        auth: AuthConfig {
            session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
            session_max_age: 3600,
            session_sweep_interval_seconds: 300,
        },
        web: WebConfig {
            static_dir: dir.join("public"),
            body_limit_bytes: 102_400,
        },
        logging: LoggingConfig {
            level: "debug".to_string(),
            format: "pretty".to_string(),
        },
    }
}

pub(crate) async fn test_state(dir: &Path, identity: Arc<dyn IdentityProvider>) -> AppState {
    AppState::with_identity_provider(test_config(dir), identity)
        .await
        .expect("test state initializes")
}

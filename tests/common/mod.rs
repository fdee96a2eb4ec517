//! Common test utilities for E2E tests

pub mod schema_validator;

use std::sync::Arc;

use async_trait::async_trait;
use postgate::auth::{AuthorizationRequest, IdentityClaims, IdentityProvider, PendingLogin};
use postgate::error::AppError;
use postgate::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

static METRICS: std::sync::Once = std::sync::Once::new();

/// Authorization code the fake provider accepts
pub const VALID_CODE: &str = "valid-code";

/// Identity provider that signs in anyone presenting [`VALID_CODE`]
///
/// Each login attempt gets a distinct state so tests can tell attempts apart.
#[derive(Default)]
pub struct FakeIdentityProvider {
    attempts: std::sync::atomic::AtomicUsize,
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn authorization_request(&self) -> AuthorizationRequest {
        let attempt = self
            .attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let csrf_token = format!("state-{attempt}");

        AuthorizationRequest {
            url: format!("https://idp.test/oauth2/default/v1/authorize?state={csrf_token}"),
            pending: PendingLogin {
                csrf_token,
                pkce_verifier: format!("verifier-{attempt}"),
                nonce: format!("nonce-{attempt}"),
            },
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        _pending: &PendingLogin,
    ) -> Result<IdentityClaims, AppError> {
        if code != VALID_CODE {
            return Err(AppError::Identity("invalid_grant".to_string()));
        }

        Ok(IdentityClaims {
            subject: "00u-test-user".to_string(),
            issuer: "https://idp.test/oauth2/default".to_string(),
            name: Some("Test User".to_string()),
            email: Some("test@example.com".to_string()),
            preferred_username: Some("test@example.com".to_string()),
        })
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    /// Client that never follows redirects, so tests can inspect them
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        // The registry is process-wide; register the instruments once per test binary
        METRICS.call_once(postgate::metrics::init_metrics);

        // Create temporary directory for test database and pages
        let temp_dir = TempDir::new().unwrap();
        let static_dir = temp_dir.path().join("public");
        std::fs::create_dir_all(&static_dir).unwrap();
        std::fs::write(
            static_dir.join("home.html"),
            "<html><body><a href=\"/login\">Sign in</a></body></html>",
        )
        .unwrap();
        std::fs::write(
            static_dir.join("admin.html"),
            "<html><body><h1>Admin Page</h1></body></html>",
        )
        .unwrap();
        std::fs::write(static_dir.join("style.css"), "body { margin: 0; }").unwrap();

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                domain: "localhost".to_string(),
                protocol: "http".to_string(),
            },
            database: config::DatabaseConfig {
                path: temp_dir.path().join("test.db"),
            },
            oidc: config::OidcConfig {
                org_url: "https://idp.test".to_string(),
                authorization_server: "default".to_string(),
                client_id: "test-client-id".to_string(),
                client_secret: "test-client-secret".to_string(),
                redirect_url: "http://localhost/authorization-code/callback".to_string(),
                scopes: "openid profile".to_string(),
                default_redirect: "/admin".to_string(),
            },
            auth: config::AuthConfig {
                session_secret: "test-secret-key-32-bytes-long!!!".to_string(),
                session_max_age: 3600,
                session_sweep_interval_seconds: 300,
            },
            web: config::WebConfig {
                static_dir,
                body_limit_bytes: 16 * 1024,
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let identity = Arc::new(FakeIdentityProvider::default());
        let state = AppState::with_identity_provider(config, identity)
            .await
            .unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        // Build router
        let app = postgate::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait a bit for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Start a sign-in at `login_path`, returning the session cookie and the
    /// provider state
    pub async fn begin_login(&self, login_path: &str, cookie: Option<&str>) -> (String, String) {
        let mut request = self.client.get(self.url(login_path));
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), 303);

        let provider_url = url::Url::parse(location(&response)).unwrap();
        let state = provider_url
            .query_pairs()
            .find(|(key, _)| key == "state")
            .map(|(_, value)| value.into_owned())
            .expect("provider URL carries state");

        let cookie = session_cookie(&response)
            .or_else(|| cookie.map(ToOwned::to_owned))
            .expect("login leaves a session cookie");
        (cookie, state)
    }

    /// Complete the callback for a pending login
    pub async fn finish_login(&self, cookie: &str, state: &str, code: &str) -> reqwest::Response {
        self.client
            .get(self.url("/authorization-code/callback"))
            .query(&[("code", code), ("state", state)])
            .header("Cookie", cookie)
            .send()
            .await
            .unwrap()
    }

    /// Sign in through the fake provider and return the authenticated cookie
    pub async fn login(&self) -> String {
        let (cookie, state) = self.begin_login("/login", None).await;
        let response = self.finish_login(&cookie, &state, VALID_CODE).await;
        assert_eq!(response.status(), 303);
        session_cookie(&response).expect("sign-in issues a new session cookie")
    }

    /// Create a post through the API
    pub async fn create_post(
        &self,
        cookie: &str,
        title: &str,
        content: &str,
    ) -> serde_json::Value {
        let response = self
            .client
            .post(self.url("/posts"))
            .header("Cookie", cookie)
            .json(&serde_json::json!({ "title": title, "content": content }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 201);
        response.json().await.unwrap()
    }
}

/// `session=...` pair from a response's Set-Cookie headers
pub fn session_cookie(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find(|value| value.starts_with("session="))
        .and_then(|value| value.split(';').next())
        .filter(|pair| *pair != "session=")
        .map(ToOwned::to_owned)
}

/// Location header of a redirect
pub fn location(response: &reqwest::Response) -> &str {
    response
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .expect("redirect has a location")
}

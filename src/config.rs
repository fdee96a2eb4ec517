//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration file (config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::{net::IpAddr, path::PathBuf};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub oidc: OidcConfig,
    pub auth: AuthConfig,
    pub web: WebConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Port number (e.g., 3000)
    pub port: u16,
    /// Public domain, optionally with port (e.g., "blog.example.com")
    pub domain: String,
    /// Protocol ("http" or "https")
    pub protocol: String,
}

impl ServerConfig {
    /// Get the base URL for the app
    ///
    /// # Returns
    /// Full URL like "https://blog.example.com"
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.protocol, self.domain)
    }
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// OpenID Connect provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OidcConfig {
    /// Identity provider organization URL (e.g., "https://dev-123.okta.com")
    pub org_url: String,
    /// Authorization server name appended to the org URL
    pub authorization_server: String,
    pub client_id: String,
    pub client_secret: String,
    /// Callback URL registered with the provider
    pub redirect_url: String,
    /// Space-separated scopes to request
    pub scopes: String,
    /// Where to send the browser after sign-in when no page asked for it
    pub default_redirect: String,
}

impl OidcConfig {
    /// Issuer URL used for provider discovery
    pub fn issuer_url(&self) -> String {
        format!(
            "{}/oauth2/{}",
            self.org_url.trim_end_matches('/'),
            self.authorization_server
        )
    }

    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scopes.split_whitespace()
    }
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Session cookie signing secret (32+ bytes)
    pub session_secret: String,
    /// Session max age in seconds (default: 86400 = 1 day)
    pub session_max_age: i64,
    /// How often expired sessions are purged
    pub session_sweep_interval_seconds: u64,
}

/// Static files and request body handling
#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    /// Directory holding home.html, admin.html and other static assets
    pub static_dir: PathBuf,
    /// Maximum accepted request body size
    pub body_limit_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub fn filter_directive(&self) -> String {
        format!("postgate={level},tower_http={level}", level = self.level)
    }

    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (POSTGATE__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000)?
            .set_default("server.domain", "localhost:3000")?
            .set_default("server.protocol", "http")?
            .set_default("database.path", "data/postgate.db")?
            .set_default("oidc.authorization_server", "default")?
            .set_default("oidc.scopes", "openid profile")?
            .set_default("oidc.default_redirect", "/admin")?
            .set_default("auth.session_max_age", 86400)?
            .set_default("auth.session_sweep_interval_seconds", 300)?
            .set_default("web.static_dir", "public")?
            .set_default("web.body_limit_bytes", 102400)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("POSTGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn should_use_secure_cookies(&self) -> bool {
        self.server.protocol.eq_ignore_ascii_case("https")
            || !is_local_server_domain(&self.server.domain)
    }

    pub(crate) fn validate(&self) -> Result<(), crate::error::AppError> {
        const MIN_SESSION_SECRET_BYTES: usize = 32;
        const MAX_SESSION_MAX_AGE_SECONDS: i64 = 365 * 24 * 60 * 60;

        if self.auth.session_secret.as_bytes().len() < MIN_SESSION_SECRET_BYTES {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_secret must be at least {} bytes",
                MIN_SESSION_SECRET_BYTES
            )));
        }

        if self.auth.session_max_age <= 0 {
            return Err(crate::error::AppError::Config(
                "auth.session_max_age must be greater than 0".to_string(),
            ));
        }

        if self.auth.session_max_age > MAX_SESSION_MAX_AGE_SECONDS {
            return Err(crate::error::AppError::Config(format!(
                "auth.session_max_age must be at most {} seconds",
                MAX_SESSION_MAX_AGE_SECONDS
            )));
        }

        url::Url::parse(&self.oidc.issuer_url()).map_err(|e| {
            crate::error::AppError::Config(format!("oidc.org_url is not a valid URL: {e}"))
        })?;
        url::Url::parse(&self.oidc.redirect_url).map_err(|e| {
            crate::error::AppError::Config(format!("oidc.redirect_url is not a valid URL: {e}"))
        })?;

        const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            return Err(crate::error::AppError::Config(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        if !self.logging.is_json() && !self.logging.format.eq_ignore_ascii_case("pretty") {
            return Err(crate::error::AppError::Config(
                "logging.format must be \"pretty\" or \"json\"".to_string(),
            ));
        }

        if !self.oidc.default_redirect.starts_with('/') {
            return Err(crate::error::AppError::Config(
                "oidc.default_redirect must be an absolute path".to_string(),
            ));
        }

        if !self.should_use_secure_cookies() {
            let host = normalized_server_host(&self.server.domain);
            tracing::warn!(
                host = %host,
                protocol = %self.server.protocol,
                "Using insecure session cookies for local development"
            );
        } else if !self.server.protocol.eq_ignore_ascii_case("https") {
            return Err(crate::error::AppError::Config(
                "server.protocol must be https for non-local server domains".to_string(),
            ));
        }

        Ok(())
    }
}

fn normalized_server_host(domain: &str) -> String {
    let trimmed = domain.trim();
    let parsed_host = url::Url::parse(&format!("http://{trimmed}"))
        .ok()
        .and_then(|url| url.host_str().map(|host| host.to_string()));
    let host = parsed_host.unwrap_or_else(|| trimmed.to_string());
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_local_server_domain(domain: &str) -> bool {
    let host = normalized_server_host(domain);
    if host == "localhost" || host.ends_with(".localhost") {
        return true;
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback() || ip.is_unspecified();
    }

    false
}

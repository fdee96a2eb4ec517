//! OpenID Connect identity provider
//!
//! Wraps provider discovery, the authorization redirect and the code
//! exchange behind [`IdentityProvider`] so the routes never depend on a
//! live provider.

use async_trait::async_trait;
use openidconnect::core::{CoreAuthenticationFlow, CoreClient, CoreProviderMetadata};
use openidconnect::{
    AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointMaybeSet, EndpointNotSet,
    EndpointSet, IssuerUrl, Nonce, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope,
    TokenResponse,
};
use serde::{Deserialize, Serialize};

use crate::config::OidcConfig;
use crate::error::AppError;

/// Secrets generated for one sign-in attempt, kept until the callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingLogin {
    pub csrf_token: String,
    pub pkce_verifier: String,
    pub nonce: String,
}

/// Identity asserted by the provider's ID token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    pub subject: String,
    pub issuer: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
}

/// Where to send the browser, and what to remember until it comes back
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub pending: PendingLogin,
}

/// A federated sign-in provider
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Build the provider sign-in URL for a new login attempt
    fn authorization_request(&self) -> AuthorizationRequest;

    /// Exchange an authorization code for verified identity claims
    async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<IdentityClaims, AppError>;
}

/// Client type produced by `from_provider_metadata`: the authorization
/// endpoint is always known, token and userinfo endpoints only if advertised.
type CoreClientWithMetadata = CoreClient<
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointMaybeSet,
    EndpointMaybeSet,
>;

/// OIDC client built from the provider's discovery document
pub struct OidcProvider {
    provider_metadata: CoreProviderMetadata,
    client_id: ClientId,
    client_secret: ClientSecret,
    redirect_url: RedirectUrl,
    scopes: Vec<String>,
    http_client: reqwest::Client,
}

impl OidcProvider {
    /// Discover the provider metadata
    ///
    /// The server does not start serving until this succeeds.
    pub async fn discover(config: &OidcConfig) -> Result<Self, AppError> {
        let issuer_url = IssuerUrl::new(config.issuer_url())
            .map_err(|e| AppError::Config(format!("invalid issuer URL: {}", e)))?;

        let redirect_url = RedirectUrl::new(config.redirect_url.clone())
            .map_err(|e| AppError::Config(format!("invalid redirect URL: {}", e)))?;

        // Token endpoint redirects are never followed
        let http_client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(e.into()))?;

        let provider_metadata = CoreProviderMetadata::discover_async(issuer_url, &http_client)
            .await
            .map_err(|e| AppError::Identity(format!("failed to discover provider: {}", e)))?;

        tracing::info!(issuer = %config.issuer_url(), "Identity provider discovered");

        Ok(Self::from_metadata(
            provider_metadata,
            config,
            redirect_url,
            http_client,
        ))
    }

    fn from_metadata(
        provider_metadata: CoreProviderMetadata,
        config: &OidcConfig,
        redirect_url: RedirectUrl,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            provider_metadata,
            client_id: ClientId::new(config.client_id.clone()),
            client_secret: ClientSecret::new(config.client_secret.clone()),
            redirect_url,
            scopes: config.scopes().map(ToOwned::to_owned).collect(),
            http_client,
        }
    }

    fn client(&self) -> CoreClientWithMetadata {
        CoreClient::from_provider_metadata(
            self.provider_metadata.clone(),
            self.client_id.clone(),
            Some(self.client_secret.clone()),
        )
        .set_redirect_uri(self.redirect_url.clone())
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorization_request(&self) -> AuthorizationRequest {
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let client = self.client();
        let mut auth_request = client
            .authorize_url(
                CoreAuthenticationFlow::AuthorizationCode,
                CsrfToken::new_random,
                Nonce::new_random,
            )
            .set_pkce_challenge(pkce_challenge);

        for scope in &self.scopes {
            // openid is always requested by the flow itself
            if scope != "openid" {
                auth_request = auth_request.add_scope(Scope::new(scope.clone()));
            }
        }

        let (auth_url, csrf_token, nonce) = auth_request.url();

        AuthorizationRequest {
            url: auth_url.to_string(),
            pending: PendingLogin {
                csrf_token: csrf_token.secret().clone(),
                pkce_verifier: pkce_verifier.secret().clone(),
                nonce: nonce.secret().clone(),
            },
        }
    }

    async fn exchange_code(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<IdentityClaims, AppError> {
        let client = self.client();

        let token_response = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .map_err(|e| AppError::Identity(format!("token endpoint error: {}", e)))?
            .set_pkce_verifier(PkceCodeVerifier::new(pending.pkce_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|e| AppError::Identity(format!("token exchange failed: {}", e)))?;

        let id_token = token_response
            .id_token()
            .ok_or_else(|| AppError::Identity("no ID token in response".to_string()))?;

        let nonce = Nonce::new(pending.nonce.clone());
        let claims = id_token
            .claims(&client.id_token_verifier(), &nonce)
            .map_err(|e| AppError::Identity(format!("ID token validation failed: {}", e)))?;

        Ok(IdentityClaims {
            subject: claims.subject().to_string(),
            issuer: claims.issuer().to_string(),
            name: claims
                .name()
                .and_then(|n| n.get(None))
                .map(|n| n.as_str().to_string()),
            email: claims.email().map(|e| e.as_str().to_string()),
            preferred_username: claims
                .preferred_username()
                .map(|u| u.as_str().to_string()),
        })
    }
}

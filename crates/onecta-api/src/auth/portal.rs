// Developer-portal OAuth flow.
//
// Standard authorization-code grant: the user opens the authorize URL,
// signs in, and the redirect carries a `code` that is exchanged for a
// credential record. Client credentials travel in the form body.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use super::endpoint::{self, Grant};
use super::pkce::random_state;
use super::session::{RefreshRequest, TokenSession};
use super::store::TokenStore;
use super::tokens::TokenSet;
use super::{AuthEvent, AuthMode, AuthProvider};
use crate::error::{Error, preview};
use crate::transport::TransportConfig;

pub const DEFAULT_PORTAL_SCOPE: &str = "openid onecta:basic.integration";

const IDP_BASE: &str = "https://idp.onecta.daikineurope.com/v1/oidc";

/// Identity-provider endpoints used by the portal flow.
#[derive(Debug, Clone)]
pub struct PortalEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub revoke: Url,
}

impl PortalEndpoints {
    /// Endpoints rooted at `base`, e.g. a mock server in tests.
    pub fn with_base(base: &str) -> Result<Self, Error> {
        let base = base.trim_end_matches('/');
        Ok(Self {
            authorize: Url::parse(&format!("{base}/authorize"))?,
            token: Url::parse(&format!("{base}/token"))?,
            revoke: Url::parse(&format!("{base}/revoke"))?,
        })
    }

    /// Production identity provider.
    pub fn daikin() -> Result<Self, Error> {
        Self::with_base(IDP_BASE)
    }
}

/// Client registration for the portal flow.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub scope: String,
    pub endpoints: PortalEndpoints,
}

impl PortalConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        redirect_uri: impl Into<String>,
    ) -> Result<Self, Error> {
        Ok(Self {
            client_id: client_id.into(),
            client_secret,
            redirect_uri: redirect_uri.into(),
            scope: DEFAULT_PORTAL_SCOPE.into(),
            endpoints: PortalEndpoints::daikin()?,
        })
    }
}

/// The URL to send the user to, plus the `state` it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub state: String,
}

struct PortalInner {
    config: PortalConfig,
    http: reqwest::Client,
    session: Arc<TokenSession>,
}

/// Developer-portal auth provider. Cheaply cloneable.
#[derive(Clone)]
pub struct PortalAuth {
    inner: Arc<PortalInner>,
}

impl PortalAuth {
    pub fn new(
        config: PortalConfig,
        store: TokenStore,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(PortalInner {
                config,
                http: transport.build_client()?,
                session: TokenSession::new(AuthMode::Portal, store),
            }),
        })
    }

    pub fn config(&self) -> &PortalConfig {
        &self.inner.config
    }

    /// Build the authorize URL. A random `state` is generated when none is
    /// given; callers should compare it against the redirect.
    pub fn build_auth_url(&self, state: Option<&str>) -> AuthorizationRequest {
        let config = &self.inner.config;
        let state = state.map_or_else(random_state, str::to_owned);

        let mut url = config.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", config.client_id.as_str())
            .append_pair("redirect_uri", config.redirect_uri.as_str())
            .append_pair("scope", &config.scope)
            .append_pair("state", &state);

        AuthorizationRequest { url, state }
    }

    /// Exchange an authorization code for a credential record and persist it.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet, Error> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::AuthFailed {
                message: "authorization code is empty".into(),
            });
        }

        let config = &self.inner.config;
        debug!("exchanging authorization code");
        let tokens = endpoint::request_tokens(
            &self.inner.http,
            &config.endpoints.token,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.expose_secret()),
            ],
            None,
            Grant::AuthorizationCode,
        )
        .await?;

        info!("portal authorization complete");
        Ok(self.inner.session.install(tokens).await)
    }

    /// Revoke the refresh token at the identity provider, then clear local
    /// credentials. Local credentials are cleared even if revocation fails.
    pub async fn revoke(&self) -> Result<(), Error> {
        if let Some(refresh_token) = self.inner.session.refresh_token_value().await {
            if let Err(e) = self.inner.revoke_remote(&refresh_token).await {
                warn!(error = %e, "token revocation failed; clearing local credentials anyway");
            }
        } else {
            debug!("no refresh token to revoke");
        }
        self.inner.session.clear().await
    }

    fn refresh_request(&self) -> impl FnOnce(SecretString) -> RefreshRequest + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move |refresh_token: SecretString| {
            async move { inner.request_refresh(&refresh_token).await }.boxed()
        }
    }
}

impl PortalInner {
    async fn request_refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, Error> {
        debug!("refreshing portal access token");
        endpoint::request_tokens(
            &self.http,
            &self.config.endpoints.token,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
            None,
            Grant::RefreshToken,
        )
        .await
    }

    async fn revoke_remote(&self, refresh_token: &SecretString) -> Result<(), Error> {
        debug!(url = %self.config.endpoints.revoke, "POST revoke");
        let resp = self
            .http
            .post(self.config.endpoints.revoke.clone())
            .form(&[
                ("token", refresh_token.expose_secret()),
                ("token_type_hint", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose_secret()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            info!("refresh token revoked");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::UnexpectedStatus {
                status: status.as_u16(),
                body: preview(&body),
            })
        }
    }
}

#[async_trait]
impl AuthProvider for PortalAuth {
    async fn access_token(&self) -> Result<SecretString, Error> {
        self.inner
            .session
            .access_token(self.refresh_request())
            .await
    }

    async fn is_authenticated(&self) -> bool {
        self.inner.session.is_authenticated().await
    }

    async fn refresh_token(&self) -> Result<TokenSet, Error> {
        self.inner
            .session
            .refresh_with(self.refresh_request())
            .await
    }

    async fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.inner.session.token_expiration().await
    }

    async fn clear_credentials(&self) -> Result<(), Error> {
        self.inner.session.clear().await
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.session.subscribe()
    }

    fn mode(&self) -> AuthMode {
        self.inner.session.mode()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn portal() -> PortalAuth {
        let mut config = PortalConfig::new(
            "my-client",
            SecretString::from("my-secret"),
            "https://example.test/callback",
        )
        .unwrap();
        config.endpoints = PortalEndpoints::with_base("https://idp.example.test/oidc/").unwrap();
        PortalAuth::new(
            config,
            TokenStore::new(std::env::temp_dir().join("onecta-portal-unit.json")),
            &TransportConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn auth_url_carries_all_parameters() {
        let request = portal().build_auth_url(Some("fixed-state"));
        assert_eq!(request.state, "fixed-state");
        assert_eq!(request.url.path(), "/oidc/authorize");

        let pairs: std::collections::HashMap<_, _> = request.url.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "my-client");
        assert_eq!(pairs["redirect_uri"], "https://example.test/callback");
        assert_eq!(pairs["scope"], DEFAULT_PORTAL_SCOPE);
        assert_eq!(pairs["state"], "fixed-state");
        assert!(!request.url.as_str().contains("my-secret"));
    }

    #[test]
    fn auth_url_generates_state() {
        let portal = portal();
        let a = portal.build_auth_url(None);
        let b = portal.build_auth_url(None);
        assert!(!a.state.is_empty());
        assert_ne!(a.state, b.state);
        assert!(a.url.as_str().contains(&a.state));
    }

    #[test]
    fn default_endpoints_point_at_daikin_idp() {
        let endpoints = PortalEndpoints::daikin().unwrap();
        assert_eq!(endpoints.token.host_str(), Some("idp.onecta.daikineurope.com"));
        assert!(endpoints.revoke.path().ends_with("/revoke"));
    }
}

// Consumer-app OAuth flow.
//
// Logs in with the same email/password the mobile app uses. The identity
// provider fronts a hosted login service, so the exchange is a five-step
// dance: PKCE authorize, login-service bootstrap, credential submit,
// authorize-continue, token exchange. Each attempt runs on its own client
// with a private cookie jar and a fresh verifier; nothing survives a
// failed attempt.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use reqwest::cookie::Jar;
use reqwest::header::LOCATION;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use super::endpoint::{self, BasicAuth, Grant};
use super::pkce::{PkcePair, fingerprint, random_state};
use super::session::{RefreshRequest, TokenSession};
use super::store::TokenStore;
use super::tokens::TokenSet;
use super::{AuthEvent, AuthMode, AuthProvider};
use crate::error::{Error, preview};
use crate::transport::TransportConfig;

pub const DEFAULT_APP_SCOPE: &str = "openid onecta:onecta.application offline_access";
pub const DEFAULT_APP_REDIRECT_URI: &str = "daikinunified://cdc/";

const IDP_BASE: &str = "https://idp.onecta.daikineurope.com/v1/oidc";
const LOGIN_SERVICE_BASE: &str = "https://cdc.daikin.eu";

/// Endpoints used by the consumer-app flow.
#[derive(Debug, Clone)]
pub struct AppEndpoints {
    pub authorize: Url,
    pub token: Url,
    pub bootstrap: Url,
    pub login: Url,
    pub authorize_continue: Url,
}

impl AppEndpoints {
    /// Endpoints under an identity-provider base and a login-service base.
    pub fn with_bases(idp_base: &str, login_base: &str, api_key: &str) -> Result<Self, Error> {
        let idp = idp_base.trim_end_matches('/');
        let login = login_base.trim_end_matches('/');
        Ok(Self {
            authorize: Url::parse(&format!("{idp}/authorize"))?,
            token: Url::parse(&format!("{idp}/token"))?,
            bootstrap: Url::parse(&format!("{login}/accounts.webSdkBootstrap"))?,
            login: Url::parse(&format!("{login}/accounts.login"))?,
            authorize_continue: Url::parse(&format!(
                "{login}/oidc/op/v1.0/{api_key}/authorize/continue"
            ))?,
        })
    }

    /// Production endpoints for the given login-service API key.
    pub fn daikin(api_key: &str) -> Result<Self, Error> {
        Self::with_bases(IDP_BASE, LOGIN_SERVICE_BASE, api_key)
    }
}

/// App registration and login-service key. There are no built-in
/// credentials; all of these come from configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: SecretString,
    pub api_key: String,
    pub redirect_uri: String,
    pub scope: String,
    pub endpoints: AppEndpoints,
}

impl AppConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: SecretString,
        api_key: impl Into<String>,
    ) -> Result<Self, Error> {
        let api_key = api_key.into();
        Ok(Self {
            client_id: client_id.into(),
            client_secret,
            endpoints: AppEndpoints::daikin(&api_key)?,
            api_key,
            redirect_uri: DEFAULT_APP_REDIRECT_URI.into(),
            scope: DEFAULT_APP_SCOPE.into(),
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Authorize = 1,
    Bootstrap,
    Login,
    AuthorizeContinue,
    TokenExchange,
}

impl Step {
    fn name(self) -> &'static str {
        match self {
            Self::Authorize => "authorize",
            Self::Bootstrap => "session bootstrap",
            Self::Login => "login",
            Self::AuthorizeContinue => "authorize continue",
            Self::TokenExchange => "token exchange",
        }
    }

    fn fail(self, detail: impl std::fmt::Display) -> Error {
        Error::AuthFailed {
            message: format!("step {} ({}): {detail}", self as u8, self.name()),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginServiceResponse {
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    error_details: Option<String>,
    #[serde(default)]
    session_info: Option<SessionInfo>,
}

impl LoginServiceResponse {
    fn describe_error(&self) -> String {
        let detail = self
            .error_details
            .as_deref()
            .or(self.error_message.as_deref())
            .unwrap_or("no details");
        format!("error code {}: {detail}", self.error_code)
    }
}

#[derive(Deserialize)]
struct SessionInfo {
    #[serde(default)]
    login_token: Option<String>,
}

struct AppInner {
    config: AppConfig,
    transport: TransportConfig,
    http: reqwest::Client,
    session: Arc<TokenSession>,
}

/// Consumer-app auth provider. Cheaply cloneable.
#[derive(Clone)]
pub struct AppAuth {
    inner: Arc<AppInner>,
}

/// Per-attempt client state: fresh cookie jar, no redirect following.
struct LoginAttempt {
    http: reqwest::Client,
    jar: Arc<Jar>,
    pkce: PkcePair,
    state: String,
}

impl AppAuth {
    pub fn new(config: AppConfig, store: TokenStore, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            inner: Arc::new(AppInner {
                config,
                transport: transport.clone(),
                http: transport.build_client()?,
                session: TokenSession::new(AuthMode::App, store),
            }),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Run the full login sequence and persist the resulting record.
    pub async fn authenticate(&self, email: &str, password: &SecretString) -> Result<TokenSet, Error> {
        if email.trim().is_empty() || password.expose_secret().is_empty() {
            return Err(Error::AuthFailed {
                message: "email and password are required".into(),
            });
        }

        let attempt = self.inner.new_attempt()?;
        let context = self.inner.authorize(&attempt).await?;
        self.inner.bootstrap(&attempt).await?;
        let login_token = self.inner.login(&attempt, email, password).await?;
        let code = self
            .inner
            .authorize_continue(&attempt, &context, &login_token)
            .await?;
        let tokens = self.inner.exchange(&attempt, &code).await?;

        info!("app login complete");
        Ok(self.inner.session.install(tokens).await)
    }

    fn refresh_request(&self) -> impl FnOnce(SecretString) -> RefreshRequest + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move |refresh_token: SecretString| {
            async move { inner.request_refresh(&refresh_token).await }.boxed()
        }
    }
}

impl AppInner {
    fn new_attempt(&self) -> Result<LoginAttempt, Error> {
        let jar = Arc::new(Jar::default());
        let transport = TransportConfig {
            cookie_jar: Some(Arc::clone(&jar)),
            ..self.transport.clone()
        }
        .without_redirects();
        Ok(LoginAttempt {
            http: transport.build_client()?,
            jar,
            pkce: PkcePair::generate(),
            state: random_state(),
        })
    }

    fn basic_auth(&self) -> BasicAuth<'_> {
        BasicAuth {
            client_id: &self.config.client_id,
            client_secret: &self.config.client_secret,
        }
    }

    /// Step 1: PKCE authorize. The redirect points at the hosted login
    /// page and carries the `context` used in step 4.
    async fn authorize(&self, attempt: &LoginAttempt) -> Result<String, Error> {
        let step = Step::Authorize;
        let mut url = self.config.endpoints.authorize.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", &attempt.state)
            .append_pair("code_challenge", &attempt.pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        debug!(url = %self.config.endpoints.authorize, "GET authorize (PKCE)");
        let resp = attempt
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| step.fail(e))?;

        let location = redirect_target(step, &resp)?;
        query_param(&location, "context")
            .ok_or_else(|| step.fail("redirect carries no context"))
    }

    /// Step 2: open a login-service session; cookies land in the jar.
    async fn bootstrap(&self, attempt: &LoginAttempt) -> Result<(), Error> {
        let step = Step::Bootstrap;
        debug!(url = %self.config.endpoints.bootstrap, "GET bootstrap");
        let resp = attempt
            .http
            .get(self.config.endpoints.bootstrap.clone())
            .query(&[
                ("apiKey", self.config.api_key.as_str()),
                ("pageURL", self.config.redirect_uri.as_str()),
                ("sdk", "js_latest"),
                ("format", "json"),
            ])
            .send()
            .await
            .map_err(|e| step.fail(e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(step.fail(format_args!("HTTP {status}")));
        }

        let body = resp.text().await.map_err(|e| step.fail(e))?;
        if let Ok(parsed) = serde_json::from_str::<LoginServiceResponse>(&body) {
            if parsed.error_code != 0 {
                return Err(step.fail(parsed.describe_error()));
            }
        }
        Ok(())
    }

    /// Step 3: submit credentials; yields the login token.
    async fn login(
        &self,
        attempt: &LoginAttempt,
        email: &str,
        password: &SecretString,
    ) -> Result<String, Error> {
        let step = Step::Login;
        let risk_context = fingerprint();
        debug!(url = %self.config.endpoints.login, "POST login");
        let resp = attempt
            .http
            .post(self.config.endpoints.login.clone())
            .form(&[
                ("loginID", email),
                ("password", password.expose_secret()),
                ("APIKey", self.config.api_key.as_str()),
                ("sessionExpiration", "31536000"),
                ("targetEnv", "jssdk"),
                ("include", "profile,data"),
                ("includeUserInfo", "true"),
                ("sdk", "js_latest"),
                ("authMode", "cookie"),
                ("pageURL", self.config.redirect_uri.as_str()),
                ("format", "json"),
                ("riskContext", risk_context.as_str()),
            ])
            .send()
            .await
            .map_err(|e| step.fail(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| step.fail(e))?;
        if !status.is_success() {
            return Err(step.fail(format_args!(
                "HTTP {status}: {}",
                preview(&body)
            )));
        }

        let parsed: LoginServiceResponse = serde_json::from_str(&body)
            .map_err(|e| step.fail(format_args!("unreadable response: {e}")))?;
        if parsed.error_code != 0 {
            return Err(step.fail(parsed.describe_error()));
        }

        let login_token = parsed
            .session_info
            .and_then(|info| info.login_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| step.fail("response carries no login token"))?;

        // The continue endpoint reads the token from this cookie as well
        // as from the query string.
        attempt.jar.add_cookie_str(
            &format!("glt_{}={login_token}", self.config.api_key),
            &self.config.endpoints.authorize_continue,
        );
        Ok(login_token)
    }

    /// Step 4: resume the authorize request with the login token. The
    /// redirect to `redirect_uri` carries the authorization code.
    async fn authorize_continue(
        &self,
        attempt: &LoginAttempt,
        context: &str,
        login_token: &str,
    ) -> Result<String, Error> {
        let step = Step::AuthorizeContinue;
        debug!(url = %self.config.endpoints.authorize_continue, "GET authorize continue");
        let resp = attempt
            .http
            .get(self.config.endpoints.authorize_continue.clone())
            .query(&[("context", context), ("login_token", login_token)])
            .send()
            .await
            .map_err(|e| step.fail(e))?;

        let location = redirect_target(step, &resp)?;
        if let Some(error) = query_param(&location, "error") {
            let detail = query_param(&location, "error_description").unwrap_or_default();
            return Err(step.fail(format_args!("{error} {detail}")));
        }
        if let Some(state) = query_param(&location, "state") {
            if state != attempt.state {
                return Err(step.fail("state mismatch in redirect"));
            }
        }
        query_param(&location, "code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| step.fail("redirect carries no authorization code"))
    }

    /// Step 5: trade the code and verifier for a credential record.
    async fn exchange(&self, attempt: &LoginAttempt, code: &str) -> Result<TokenSet, Error> {
        endpoint::request_tokens(
            &self.http,
            &self.config.endpoints.token,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", attempt.pkce.verifier.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ],
            Some(self.basic_auth()),
            Grant::AuthorizationCode,
        )
        .await
        .map_err(|e| match e {
            Error::AuthFailed { message } => Step::TokenExchange.fail(message),
            other => Step::TokenExchange.fail(other),
        })
    }

    async fn request_refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, Error> {
        debug!("refreshing app access token");
        endpoint::request_tokens(
            &self.http,
            &self.config.endpoints.token,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret()),
            ],
            Some(self.basic_auth()),
            Grant::RefreshToken,
        )
        .await
    }
}

/// Resolve the `Location` of a 3xx response.
fn redirect_target(step: Step, resp: &reqwest::Response) -> Result<Url, Error> {
    let status = resp.status();
    if !status.is_redirection() {
        return Err(step.fail(format_args!("expected a redirect, got HTTP {status}")));
    }
    let location = resp
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| step.fail("redirect has no Location header"))?;
    resp.url()
        .join(location)
        .map_err(|e| step.fail(format_args!("invalid Location {location:?}: {e}")))
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[async_trait]
impl AuthProvider for AppAuth {
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

    #[test]
    fn continue_endpoint_embeds_api_key() {
        let endpoints = AppEndpoints::daikin("KEY123").unwrap();
        assert_eq!(
            endpoints.authorize_continue.as_str(),
            "https://cdc.daikin.eu/oidc/op/v1.0/KEY123/authorize/continue"
        );
        assert_eq!(
            endpoints.bootstrap.as_str(),
            "https://cdc.daikin.eu/accounts.webSdkBootstrap"
        );
    }

    #[test]
    fn step_errors_name_the_step() {
        match Step::AuthorizeContinue.fail("boom") {
            Error::AuthFailed { message } => {
                assert_eq!(message, "step 4 (authorize continue): boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn query_param_handles_custom_schemes() {
        let url = Url::parse("daikinunified://cdc/?code=abc&state=xyz").unwrap();
        assert_eq!(query_param(&url, "code").as_deref(), Some("abc"));
        assert_eq!(query_param(&url, "missing"), None);
    }

    #[test]
    fn login_error_description_prefers_details() {
        let resp: LoginServiceResponse = serde_json::from_value(serde_json::json!({
            "errorCode": 403042,
            "errorMessage": "Invalid LoginID",
            "errorDetails": "invalid loginID or password"
        }))
        .unwrap();
        assert_eq!(
            resp.describe_error(),
            "error code 403042: invalid loginID or password"
        );
    }
}

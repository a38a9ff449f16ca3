// ── Runtime controller configuration ──
//
// Describes how to reach the cloud and which flow to authenticate with.
// Carries credentials and tuning but never touches disk: the CLI builds a
// `ControllerConfig` from its profile and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use onecta_api::realtime::DEFAULT_REALTIME_URL;
use onecta_api::rest::DEFAULT_API_BASE;
use onecta_api::{AppConfig, AuthMode, PortalConfig, ReconnectConfig, RetryPolicy};

use crate::error::CoreError;

/// Which OAuth flow to use, with its registration data.
#[derive(Debug, Clone)]
pub enum AuthSettings {
    /// Developer-portal authorization-code flow.
    Portal(PortalConfig),
    /// Consumer-app login. Email and password are only needed for a
    /// fresh login; a stored record is refreshed without them.
    App {
        config: AppConfig,
        email: Option<String>,
        password: Option<SecretString>,
    },
}

impl AuthSettings {
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Portal(_) => AuthMode::Portal,
            Self::App { .. } => AuthMode::App,
        }
    }
}

/// Everything a [`Controller`](crate::Controller) needs to run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub auth: AuthSettings,
    /// REST API base, e.g. `https://api.onecta.daikineurope.com`.
    pub api_base: Url,
    /// Realtime push endpoint (`wss://...`).
    pub realtime_url: Url,
    /// Where the credential record for this account lives.
    pub token_path: PathBuf,
    /// Per-request timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub reconnect: ReconnectConfig,
    /// Open the realtime channel from [`Controller::start`](crate::Controller::start).
    pub realtime_enabled: bool,
}

impl ControllerConfig {
    /// Defaults for the public cloud endpoints.
    pub fn new(auth: AuthSettings, token_path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        Ok(Self {
            auth,
            api_base: parse_url(DEFAULT_API_BASE)?,
            realtime_url: parse_url(DEFAULT_REALTIME_URL)?,
            token_path: token_path.into(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            reconnect: ReconnectConfig::default(),
            realtime_enabled: true,
        })
    }
}

fn parse_url(raw: &str) -> Result<Url, CoreError> {
    Url::parse(raw).map_err(|e| CoreError::Config {
        message: format!("invalid URL {raw}: {e}"),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn defaults_point_at_public_cloud() {
        let portal = PortalConfig::new("id", SecretString::from("secret"), "https://localhost/cb")
            .unwrap();
        let config = ControllerConfig::new(AuthSettings::Portal(portal), "/tmp/t.json").unwrap();

        assert_eq!(config.auth.mode(), AuthMode::Portal);
        assert_eq!(config.api_base.host_str(), Some("api.onecta.daikineurope.com"));
        assert_eq!(config.realtime_url.scheme(), "wss");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.realtime_enabled);
        assert_eq!(config.retry.max_attempts, 3);
    }
}

// Authentication for the Onecta cloud.
//
// Two interchangeable flows sit behind the `AuthProvider` trait:
// `PortalAuth` (developer-portal authorization-code exchange) and
// `AppAuth` (consumer-app login with PKCE). Both share the same token
// file handling and refresh machinery in `session`.

pub mod app;
mod endpoint;
mod flight;
pub mod pkce;
pub mod portal;
mod session;
mod store;
mod tokens;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

pub use app::{AppAuth, AppConfig, AppEndpoints};
pub use flight::RefreshFailure;
pub use portal::{AuthorizationRequest, PortalAuth, PortalConfig, PortalEndpoints};
pub use store::TokenStore;
pub use tokens::{REFRESH_BUFFER_SECS, TokenSet};

use crate::error::Error;

/// Which OAuth flow a provider implements.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum AuthMode {
    /// Developer-portal client credentials + authorization code.
    #[default]
    Portal,
    /// Consumer mobile-app credentials + email/password login.
    App,
}

impl AuthMode {
    /// Default token file name for this flow.
    pub fn token_file_name(self) -> &'static str {
        match self {
            Self::Portal => "portal-tokens.json",
            Self::App => "app-tokens.json",
        }
    }
}

/// Credential lifecycle notifications. Never carries token material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    TokenChanged {
        mode: AuthMode,
        expires_at: Option<DateTime<Utc>>,
    },
    RefreshFailed {
        mode: AuthMode,
        message: String,
        invalid_grant: bool,
    },
    CredentialsCleared {
        mode: AuthMode,
    },
}

/// Capability contract shared by both auth flows.
///
/// The REST and realtime clients only ever see this trait; which flow
/// backs it is decided once, from configuration.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// A currently valid access token, refreshing first when the stored
    /// record is inside the refresh buffer.
    ///
    /// Fails with [`Error::AuthRequired`] when no usable record exists.
    async fn access_token(&self) -> Result<SecretString, Error>;

    /// Whether a record exists that is valid or can be refreshed.
    async fn is_authenticated(&self) -> bool;

    /// Force a refresh. Concurrent callers share one network request.
    async fn refresh_token(&self) -> Result<TokenSet, Error>;

    /// Absolute expiry of the current access token, if known.
    async fn token_expiration(&self) -> Option<DateTime<Utc>>;

    /// Forget the in-memory record and delete the token file.
    async fn clear_credentials(&self) -> Result<(), Error>;

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;

    fn mode(&self) -> AuthMode;
}

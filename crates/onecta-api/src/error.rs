use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the `onecta-api` crate.
///
/// Covers every failure mode across all API surfaces: the two OAuth
/// flows, the token file, the REST pipeline, and the realtime channel.
/// `onecta-core` wraps these without losing the category.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// No usable credential is available; the user must log in.
    #[error("Authentication required -- no usable credentials")]
    AuthRequired,

    /// A login or code-exchange sequence failed at some step.
    #[error("Authentication failed: {message}")]
    AuthFailed { message: String },

    /// A token refresh was attempted and rejected.
    ///
    /// `invalid_grant` is set when the identity provider rejected the
    /// refresh token itself; the stored credential is then useless.
    #[error("Token refresh failed: {message}")]
    RefreshFailed { message: String, invalid_grant: bool },

    /// The API kept answering 401 after the refresh retries ran out.
    #[error("Unauthorized -- the API rejected the access token")]
    Unauthorized,

    // ── Rate limiting ───────────────────────────────────────────────
    /// Rate limited, either by the server (429) or the local breaker.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── HTTP status failures ────────────────────────────────────────
    /// 400/404/409/422 from the API. Never retried.
    #[error("Request rejected (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    /// 502/503/504 persisted through every retry.
    #[error("Gateway unavailable (HTTP {status}) after {attempts} attempts")]
    GatewayUnavailable { status: u16, attempts: u32 },

    /// Any other non-success status.
    #[error("Unexpected response (HTTP {status}): {body}")]
    UnexpectedStatus { status: u16, body: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Realtime ────────────────────────────────────────────────────
    /// Realtime transport failure. Non-fatal, triggers a reconnect.
    #[error("Realtime channel error: {0}")]
    Realtime(String),

    // ── Data ────────────────────────────────────────────────────────
    /// Malformed data where a well-formed value was required.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Reading or writing the token file failed.
    #[error("Token storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::RateLimited { .. } | Self::GatewayUnavailable { .. } | Self::Realtime(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if the caller must re-authenticate before
    /// anything will succeed again.
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired
                | Self::AuthFailed { .. }
                | Self::Unauthorized
                | Self::RefreshFailed { invalid_grant: true, .. }
        )
    }

    /// The HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. }
            | Self::GatewayUnavailable { status, .. }
            | Self::UnexpectedStatus { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Unauthorized => Some(401),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// First 200 characters of a response body, for error messages.
pub(crate) fn preview(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates() {
        assert_eq!(preview(&"x".repeat(500)).len(), 200);
        assert_eq!(preview("short"), "short");
    }

    #[test]
    fn reauth_classification() {
        assert!(Error::AuthRequired.requires_reauth());
        assert!(Error::Unauthorized.requires_reauth());
        assert!(
            Error::RefreshFailed {
                message: "invalid_grant".into(),
                invalid_grant: true,
            }
            .requires_reauth()
        );
        assert!(
            !Error::RefreshFailed {
                message: "server error".into(),
                invalid_grant: false,
            }
            .requires_reauth()
        );
        assert!(!Error::RateLimited { retry_after_secs: 5 }.requires_reauth());
    }

    #[test]
    fn transient_classification() {
        assert!(Error::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(
            Error::GatewayUnavailable {
                status: 503,
                attempts: 4
            }
            .is_transient()
        );
        assert!(Error::Realtime("closed".into()).is_transient());
        assert!(
            !Error::Client {
                status: 400,
                body: String::new()
            }
            .is_transient()
        );
    }

    #[test]
    fn status_mapping() {
        assert_eq!(Error::Unauthorized.status(), Some(401));
        assert_eq!(Error::RateLimited { retry_after_secs: 3 }.status(), Some(429));
        assert_eq!(
            Error::Client {
                status: 422,
                body: "bad".into()
            }
            .status(),
            Some(422)
        );
        assert_eq!(Error::AuthRequired.status(), None);
    }
}

// ── Core error types ──
//
// Transport-level failures pass through unchanged so callers can still
// match on rate limits and auth errors; the core adds its own lookups
// and configuration problems on top.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── API errors (passed through) ──────────────────────────────────
    #[error(transparent)]
    Api(#[from] onecta_api::Error),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// The wrapped API error, if this is one.
    pub fn api(&self) -> Option<&onecta_api::Error> {
        match self {
            Self::Api(e) => Some(e),
            _ => None,
        }
    }

    /// The user has to log in again before anything will work.
    pub fn requires_reauth(&self) -> bool {
        self.api().is_some_and(onecta_api::Error::requires_reauth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_keep_their_message() {
        let err = CoreError::from(onecta_api::Error::RateLimited {
            retry_after_secs: 12,
        });
        assert_eq!(
            err.to_string(),
            onecta_api::Error::RateLimited {
                retry_after_secs: 12
            }
            .to_string()
        );
        assert!(matches!(
            err.api(),
            Some(onecta_api::Error::RateLimited { .. })
        ));
    }

    #[test]
    fn reauth_follows_api_classification() {
        assert!(CoreError::from(onecta_api::Error::AuthRequired).requires_reauth());
        assert!(
            !CoreError::DeviceNotFound {
                identifier: "x".into()
            }
            .requires_reauth()
        );
    }
}

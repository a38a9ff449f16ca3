//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use onecta_config::ConfigError;
use onecta_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const RATE_LIMITED: i32 = 5;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the Onecta cloud: {message}")]
    #[diagnostic(
        code(onecta::connection_failed),
        help("Check your network connection, or raise the profile `timeout`.")
    )]
    ConnectionFailed { message: String },

    #[error("The Onecta cloud is rate limiting this account")]
    #[diagnostic(
        code(onecta::rate_limited),
        help("Try again in {retry_after_secs}s. The daily quota resets at midnight UTC.")
    )]
    RateLimited { retry_after_secs: u64 },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Not logged in")]
    #[diagnostic(
        code(onecta::auth_required),
        help(
            "Portal profiles: run `onecta auth-url`, open it, then `onecta exchange <code>`.\n\
             App profiles: run `onecta login`."
        )
    )]
    AuthRequired,

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(onecta::auth_failed),
        help("Verify the profile credentials, then log in again.")
    )]
    AuthFailed { message: String },

    #[error("'{operation}' requires auth_mode = \"{required}\"")]
    #[diagnostic(
        code(onecta::unsupported),
        help("Set `auth_mode = \"{required}\"` in the profile, or pick another with --profile.")
    )]
    Unsupported { operation: String, required: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("Device '{identifier}' not found")]
    #[diagnostic(
        code(onecta::not_found),
        help("Run: onecta devices to see available devices")
    )]
    NotFound { identifier: String },

    #[error("{path} is not present on device '{device}'")]
    #[diagnostic(code(onecta::no_value))]
    NoValue { device: String, path: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error{}: {message}", http_suffix(.status))]
    #[diagnostic(code(onecta::api_error))]
    ApiError {
        message: String,
        status: Option<u16>,
    },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(onecta::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(onecta::profile_not_found),
        help("Add a [profiles.{name}] table to {path}")
    )]
    ProfileNotFound { name: String, path: String },

    #[error("Profile '{profile}' is missing {what}")]
    #[diagnostic(
        code(onecta::missing_setting),
        help(
            "Set `{what}` in the profile, store it with the system keyring,\n\
             or export it in the environment."
        )
    )]
    MissingSetting { profile: String, what: String },

    #[error(transparent)]
    #[diagnostic(code(onecta::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(onecta::json))]
    Json(#[from] serde_json::Error),
}

#[allow(clippy::ref_option)]
fn http_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::RateLimited { .. } => exit_code::RATE_LIMITED,
            Self::AuthRequired | Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::NoValue { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::Unsupported { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── Library error mapping ────────────────────────────────────────────

impl From<onecta_api::Error> for CliError {
    fn from(err: onecta_api::Error) -> Self {
        use onecta_api::Error as Api;

        match err {
            Api::AuthRequired | Api::Unauthorized => Self::AuthRequired,
            Api::AuthFailed { message } => Self::AuthFailed { message },
            Api::RefreshFailed {
                message,
                invalid_grant: true,
            } => Self::AuthFailed { message },
            Api::RateLimited { retry_after_secs } => Self::RateLimited { retry_after_secs },
            Api::Transport(e) => Self::ConnectionFailed {
                message: e.to_string(),
            },
            Api::GatewayUnavailable { .. } | Api::Realtime(_) => Self::ConnectionFailed {
                message: err.to_string(),
            },
            Api::Validation { message } => Self::Validation {
                field: "value".into(),
                reason: message,
            },
            other => Self::ApiError {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Api(api) => api.into(),
            CoreError::DeviceNotFound { identifier } => Self::NotFound { identifier },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::ApiError {
                message,
                status: None,
            },
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::UnknownProfile(name) => Self::ProfileNotFound {
                name,
                path: onecta_config::config_path().display().to_string(),
            },
            ConfigError::Missing { profile, what } => Self::MissingSetting { profile, what },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Core(core) => core.into(),
            other => Self::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_keeps_the_delay() {
        let err: CliError = CoreError::Api(onecta_api::Error::RateLimited {
            retry_after_secs: 42,
        })
        .into();
        assert!(matches!(err, CliError::RateLimited { retry_after_secs: 42 }));
        assert_eq!(err.exit_code(), exit_code::RATE_LIMITED);
    }

    #[test]
    fn rejected_refresh_is_an_auth_failure() {
        let err: CliError = onecta_api::Error::RefreshFailed {
            message: "invalid_grant".into(),
            invalid_grant: true,
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn client_errors_keep_status() {
        let err: CliError = onecta_api::Error::Client {
            status: 422,
            body: "bad".into(),
        }
        .into();
        match err {
            CliError::ApiError { status, .. } => assert_eq!(status, Some(422)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_profile_setting_maps_through() {
        let err: CliError = ConfigError::Missing {
            profile: "home".into(),
            what: "client_id".into(),
        }
        .into();
        assert!(matches!(err, CliError::MissingSetting { .. }));
        assert_eq!(
            CliError::from(CoreError::DeviceNotFound {
                identifier: "x".into()
            })
            .exit_code(),
            exit_code::NOT_FOUND
        );
    }
}

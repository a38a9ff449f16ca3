//! Shared configuration for onecta tools.
//!
//! TOML profiles, secret resolution (env + keyring + plaintext), platform
//! paths, and translation to `onecta_core::ControllerConfig`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use onecta_api::{AppConfig, AuthMode, PortalConfig};
use onecta_core::{AuthSettings, ControllerConfig, CoreError};

/// Keyring service name for stored secrets.
pub const KEYRING_SERVICE: &str = "onecta";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' is missing {what}")]
    Missing { profile: String, what: String },

    #[error("unknown profile '{0}'")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Open the realtime channel when a command needs live updates.
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            timeout: default_timeout(),
            realtime: default_realtime(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_realtime() -> bool {
    true
}

/// One cloud account.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Profile {
    /// "portal" or "app".
    #[serde(default)]
    pub auth_mode: AuthMode,

    pub client_id: Option<String>,

    /// Client secret (plaintext; prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable holding the client secret.
    pub client_secret_env: Option<String>,

    /// Login-service key for the app flow.
    pub api_key: Option<String>,

    pub redirect_uri: Option<String>,

    /// Overrides the flow's default scope.
    pub scope: Option<String>,

    /// Account email for the app flow.
    pub email: Option<String>,

    /// Account password for the app flow (plaintext; prefer keyring).
    pub password: Option<String>,

    pub api_url: Option<String>,

    pub realtime_url: Option<String>,

    /// Overrides the default token file location.
    pub token_file: Option<PathBuf>,

    /// Overrides `defaults.timeout`.
    pub timeout: Option<u64>,

    /// Overrides `defaults.realtime`.
    pub realtime: Option<bool>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "onecta", "onecta")
}

fn home_fallback(parts: &[&str]) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.extend(parts);
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".config", "onecta", "config.toml"]),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory holding token files.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(&[".local", "share", "onecta"]),
        |dirs| dirs.data_dir().to_path_buf(),
    )
}

/// Token file for a profile: the explicit `token_file`, else
/// `<data dir>/<profile>/<mode>-tokens.json`.
pub fn token_path(profile: &Profile, profile_name: &str) -> PathBuf {
    profile.token_file.clone().unwrap_or_else(|| {
        data_dir()
            .join(profile_name)
            .join(profile.auth_mode.token_file_name())
    })
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Defaults, then the TOML file at `path` (if any), then `ONECTA_*`
/// environment variables. Nested keys use a double underscore:
/// `ONECTA_DEFAULTS__TIMEOUT=10`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("ONECTA_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

impl Config {
    /// The named profile, or the default one.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile(name.into()))
    }

    /// Build a `ControllerConfig` for the named (or default) profile.
    pub fn controller_config(&self, name: Option<&str>) -> Result<ControllerConfig, ConfigError> {
        let (name, profile) = self.profile(name)?;
        profile_to_controller_config(profile, name, &self.defaults)
    }
}

// ── Secret resolution ───────────────────────────────────────────────

/// Look a secret up in order: the environment variable `env_name`, the
/// system keyring under `onecta` / `<profile>/<kind>`, then `plaintext`.
pub fn resolve_secret(
    profile_name: &str,
    kind: &str,
    env_name: Option<&str>,
    plaintext: Option<&str>,
) -> Option<SecretString> {
    // 1. Environment
    if let Some(env_name) = env_name {
        if let Ok(val) = std::env::var(env_name) {
            debug!(profile = profile_name, kind, "secret from environment");
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}")) {
        if let Ok(secret) = entry.get_password() {
            debug!(profile = profile_name, kind, "secret from keyring");
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    plaintext.map(|s| SecretString::from(s.to_owned()))
}

/// Store a secret in the system keyring.
pub fn store_secret(profile_name: &str, kind: &str, secret: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/{kind}"))
        .and_then(|entry| entry.set_password(secret))
        .map_err(|e| ConfigError::Validation {
            field: kind.into(),
            reason: format!("keyring: {e}"),
        })
}

fn required<'a>(value: Option<&'a str>, profile: &str, what: &str) -> Result<&'a str, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::Missing {
            profile: profile.into(),
            what: what.into(),
        })
}

fn client_secret(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    resolve_secret(
        profile_name,
        "client-secret",
        profile.client_secret_env.as_deref(),
        profile.client_secret.as_deref(),
    )
    .ok_or_else(|| ConfigError::Missing {
        profile: profile_name.into(),
        what: "client_secret".into(),
    })
}

fn invalid(field: &str) -> impl FnOnce(onecta_api::Error) -> ConfigError + '_ {
    move |e| ConfigError::Validation {
        field: field.into(),
        reason: e.to_string(),
    }
}

/// Resolve the auth flow and its registration from a profile.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<AuthSettings, ConfigError> {
    let client_id = required(profile.client_id.as_deref(), profile_name, "client_id")?;
    let secret = client_secret(profile, profile_name)?;

    match profile.auth_mode {
        AuthMode::Portal => {
            let redirect_uri =
                required(profile.redirect_uri.as_deref(), profile_name, "redirect_uri")?;
            let mut portal =
                PortalConfig::new(client_id, secret, redirect_uri).map_err(invalid("endpoints"))?;
            if let Some(ref scope) = profile.scope {
                portal.scope.clone_from(scope);
            }
            Ok(AuthSettings::Portal(portal))
        }
        AuthMode::App => {
            let api_key = resolve_secret(profile_name, "api-key", None, profile.api_key.as_deref())
                .ok_or_else(|| ConfigError::Missing {
                    profile: profile_name.into(),
                    what: "api_key".into(),
                })?;
            let mut app = AppConfig::new(client_id, secret, api_key.expose_secret())
                .map_err(invalid("endpoints"))?;
            if let Some(ref redirect_uri) = profile.redirect_uri {
                app.redirect_uri.clone_from(redirect_uri);
            }
            if let Some(ref scope) = profile.scope {
                app.scope.clone_from(scope);
            }
            let password = resolve_secret(
                profile_name,
                "password",
                Some("ONECTA_PASSWORD"),
                profile.password.as_deref(),
            );
            Ok(AuthSettings::App {
                config: app,
                email: profile.email.clone(),
                password,
            })
        }
    }
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|e: url::ParseError| ConfigError::Validation {
        field: field.into(),
        reason: format!("{raw}: {e}"),
    })
}

/// Build a `ControllerConfig` from a profile, falling back to `defaults`.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let auth = resolve_auth(profile, profile_name)?;
    let mut config = ControllerConfig::new(auth, token_path(profile, profile_name))?;

    if let Some(ref api_url) = profile.api_url {
        config.api_base = parse_url("api_url", api_url)?;
    }
    if let Some(ref realtime_url) = profile.realtime_url {
        config.realtime_url = parse_url("realtime_url", realtime_url)?;
    }
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.realtime_enabled = profile.realtime.unwrap_or(defaults.realtime);
    Ok(config)
}

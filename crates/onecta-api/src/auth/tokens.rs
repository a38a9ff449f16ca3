// OAuth credential record as issued by the token endpoint and persisted
// to disk. Token strings stay wrapped in `SecretString` in memory and are
// only exposed while serializing.

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A record is considered expired this long before its real expiry, so a
/// token never goes stale between the check and the request that uses it.
pub const REFRESH_BUFFER_SECS: i64 = 10;

/// Credential record: `{access_token, refresh_token?, token_type,
/// expires_in?, expires_at?, scope?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(with = "secret_string")]
    pub access_token: SecretString,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "secret_string_opt"
    )]
    pub refresh_token: Option<SecretString>,

    pub token_type: String,

    /// Lifetime in seconds, as reported at issue time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,

    /// Absolute expiry, derived from `expires_in` when the record arrives.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenSet {
    /// Build a bearer record. Mostly useful for tests and fixtures.
    pub fn bearer(access_token: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_in,
            expires_at: None,
            scope: None,
        }
    }

    /// Attach a refresh token.
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(SecretString::from(refresh_token.into()));
        self
    }

    /// Derive `expires_at = now + expires_in` if only the relative
    /// lifetime is known. Returns `true` when the record changed.
    ///
    /// Lifetimes past chrono's range clamp to the latest representable
    /// instant.
    pub fn normalize(&mut self, now: DateTime<Utc>) -> bool {
        if self.expires_at.is_some() {
            return false;
        }
        let Some(secs) = self.expires_in else {
            return false;
        };
        let expires_at = i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.expires_at = Some(expires_at);
        true
    }

    /// Whether the access token may still be used at `now`.
    ///
    /// A record without any expiry information is assumed usable; the API
    /// answers 401 if it is not, which triggers a refresh.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(at) => TimeDelta::try_seconds(REFRESH_BUFFER_SECS)
                .and_then(|buffer| at.checked_sub_signed(buffer))
                .is_some_and(|deadline| now < deadline),
            None => true,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|t| !t.expose_secret().is_empty())
    }

    /// Schema check applied to records loaded from disk.
    pub fn validate(&self) -> Result<(), Error> {
        if self.access_token.expose_secret().is_empty() {
            return Err(Error::Validation {
                message: "access_token is empty".into(),
            });
        }
        if self.token_type.trim().is_empty() {
            return Err(Error::Validation {
                message: "token_type is empty".into(),
            });
        }
        Ok(())
    }
}

mod secret_string {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(secret: &SecretString, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(secret.expose_secret())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<SecretString, D::Error> {
        String::deserialize(de).map(SecretString::from)
    }
}

mod secret_string_opt {
    use secrecy::{ExposeSecret, SecretString};
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(
        secret: &Option<SecretString>,
        ser: S,
    ) -> Result<S::Ok, S::Error> {
        match secret {
            Some(value) => ser.serialize_some(value.expose_secret()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<SecretString>, D::Error> {
        Ok(Option::<String>::deserialize(de)?.map(SecretString::from))
    }
}

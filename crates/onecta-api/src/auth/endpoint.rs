// Token endpoint plumbing shared by both OAuth flows.
//
// Both flows post an `application/x-www-form-urlencoded` body to a token
// endpoint and receive the same JSON record back. They differ only in how
// the client authenticates (form fields vs. HTTP Basic) and in which error
// a rejection maps to.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::tokens::TokenSet;
use crate::error::{Error, preview};

/// What the token request was for; selects the error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    fn failure(self, message: String, invalid_grant: bool) -> Error {
        match self {
            Self::AuthorizationCode => Error::AuthFailed { message },
            Self::RefreshToken => Error::RefreshFailed {
                message,
                invalid_grant,
            },
        }
    }
}

/// HTTP Basic client credentials.
pub(crate) struct BasicAuth<'a> {
    pub client_id: &'a str,
    pub client_secret: &'a SecretString,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    token_type: String,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".into()
}

impl From<TokenResponse> for TokenSet {
    fn from(resp: TokenResponse) -> Self {
        Self {
            access_token: SecretString::from(resp.access_token),
            refresh_token: resp
                .refresh_token
                .filter(|t| !t.is_empty())
                .map(SecretString::from),
            token_type: resp.token_type,
            expires_in: resp.expires_in,
            expires_at: None,
            scope: resp.scope,
        }
    }
}

/// RFC 6749 error body: `{"error": "...", "error_description": "..."}`.
#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST `form` to the token endpoint and parse the credential record.
pub(crate) async fn request_tokens(
    http: &reqwest::Client,
    url: &Url,
    form: &[(&str, &str)],
    basic: Option<BasicAuth<'_>>,
    grant: Grant,
) -> Result<TokenSet, Error> {
    debug!(url = %url, ?grant, "POST token endpoint");

    let mut request = http.post(url.clone()).form(form);
    if let Some(basic) = basic {
        request = request.basic_auth(basic.client_id, Some(basic.client_secret.expose_secret()));
    }

    let resp = request
        .send()
        .await
        .map_err(|e| grant.failure(format!("token request failed: {e}"), false))?;

    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| grant.failure(format!("token response unreadable: {e}"), false))?;

    if !status.is_success() {
        return Err(match serde_json::from_str::<OAuthErrorBody>(&body) {
            Ok(err) => {
                let message = match err.error_description {
                    Some(desc) if !desc.is_empty() => format!("{}: {desc}", err.error),
                    _ => err.error.clone(),
                };
                grant.failure(
                    format!("token endpoint returned HTTP {status}: {message}"),
                    err.error == "invalid_grant",
                )
            }
            Err(_) => grant.failure(
                format!("token endpoint returned HTTP {status}: {}", preview(&body)),
                false,
            ),
        });
    }

    let parsed: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| grant.failure(format!("token response is not a credential record: {e}"), false))?;
    let tokens = TokenSet::from(parsed);
    tokens
        .validate()
        .map_err(|e| grant.failure(e.to_string(), false))?;
    Ok(tokens)
}

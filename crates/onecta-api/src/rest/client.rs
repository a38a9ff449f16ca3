// Authenticated REST client for the Onecta cloud API.
//
// Every call goes through one pipeline: local rate-limit breaker, bearer
// token from the auth provider, request, rate-limit snapshot from the
// response headers, then status classification with bounded retries for
// 401 (after a refresh) and gateway errors.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use super::models::GatewayDevice;
use super::rate_limit::{Breaker, RateLimitStatus, retry_after};
use crate::auth::AuthProvider;
use crate::error::{Error, preview};
use crate::transport::TransportConfig;

pub const DEFAULT_API_BASE: &str = "https://api.onecta.daikineurope.com";

const EVENT_CHANNEL_SIZE: usize = 64;

// ── Retry policy ─────────────────────────────────────────────────────

/// Retry and rate-limit tunables for [`CloudClient`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first call, for 401 and 502/503/504.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Refresh the token and retry when the API answers 401.
    pub retry_unauthorized: bool,
    /// Upper bound for a server-requested rate-limit block.
    pub max_block: Duration,
    /// Block applied when a 429 carries no usable `retry-after`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            retry_unauthorized: true,
            max_block: Duration::from_secs(24 * 60 * 60),
            default_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt + jitter(0..base), max_delay)`, attempt from 0.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let exp = base.saturating_mul(1_u64 << attempt.min(32));
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..base)
        } else {
            0
        };
        Duration::from_millis(exp.saturating_add(jitter).min(max))
    }
}

// ── Events ───────────────────────────────────────────────────────────

/// Notifications from the REST pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiEvent {
    /// A response carried rate-limit headers.
    RateLimit(RateLimitStatus),
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the gateway-devices API.
pub struct CloudClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Arc<dyn AuthProvider>,
    retry: RetryPolicy,
    breaker: Breaker,
    rate_limit: ArcSwap<RateLimitStatus>,
    events: broadcast::Sender<ApiEvent>,
}

impl CloudClient {
    pub fn new(
        base_url: &str,
        auth: Arc<dyn AuthProvider>,
        transport: &TransportConfig,
        retry: RetryPolicy,
    ) -> Result<Self, Error> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        Ok(Self {
            http: transport.build_client()?,
            base_url,
            auth,
            retry,
            breaker: Breaker::default(),
            rate_limit: ArcSwap::from_pointee(RateLimitStatus::default()),
            events,
        })
    }

    pub fn auth(&self) -> &Arc<dyn AuthProvider> {
        &self.auth
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Latest rate-limit snapshot (all `None` before the first response).
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        **self.rate_limit.load()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApiEvent> {
        self.events.subscribe()
    }

    // ── Typed endpoints ──────────────────────────────────────────────

    /// `GET /v1/gateway-devices`
    pub async fn get_devices(&self) -> Result<Vec<GatewayDevice>, Error> {
        let value = self
            .request(Method::GET, "v1/gateway-devices", None)
            .await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode(value)
    }

    /// `GET /v1/gateway-devices/{id}`
    pub async fn get_device(&self, device_id: &str) -> Result<GatewayDevice, Error> {
        let url = self.endpoint(["v1", "gateway-devices", device_id])?;
        let value = self.send(Method::GET, url, None).await?;
        decode(value)
    }

    /// `PATCH /v1/gateway-devices/{id}/management-points/{embeddedId}/characteristics/{name}`
    ///
    /// Sends `{"value": ...}`, plus `"path"` when a nested value is addressed.
    pub async fn update_device(
        &self,
        device_id: &str,
        embedded_id: &str,
        characteristic: &str,
        value: Value,
        path: Option<&str>,
    ) -> Result<(), Error> {
        let url = self.endpoint([
            "v1",
            "gateway-devices",
            device_id,
            "management-points",
            embedded_id,
            "characteristics",
            characteristic,
        ])?;
        let body = match path {
            Some(path) => json!({ "value": value, "path": path }),
            None => json!({ "value": value }),
        };
        self.send(Method::PATCH, url, Some(&body)).await?;
        Ok(())
    }

    // ── Pipeline ─────────────────────────────────────────────────────

    /// Issue a request against a path relative to the API base and return
    /// the JSON body (`Null` for 204 or an empty body).
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, Error> {
        let url = self.endpoint(path.split('/').filter(|s| !s.is_empty()))?;
        self.send(method, url, body).await
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Validation {
                message: format!("API base {} cannot carry a path", self.base_url),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Value, Error> {
        let mut attempt: u32 = 0;

        loop {
            if let Some(secs) = self.breaker.remaining_secs() {
                debug!(%url, retry_after_secs = secs, "rate-limit breaker armed; refusing request");
                return Err(Error::RateLimited {
                    retry_after_secs: secs,
                });
            }

            let token = self.auth.access_token().await?;

            debug!("{method} {url} (attempt {})", attempt + 1);
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(token.expose_secret());
            if let Some(body) = body {
                request = request.json(body);
            }

            let resp = request.send().await?;
            let status = resp.status();
            self.record_rate_limit(resp.headers());

            if status.is_success() {
                return parse_body(status, resp).await;
            }

            match status {
                StatusCode::UNAUTHORIZED => {
                    if !self.retry.retry_unauthorized || attempt >= self.retry.max_attempts {
                        return Err(Error::Unauthorized);
                    }
                    warn!(%url, attempt, "API rejected access token; refreshing");
                    if let Err(e) = self.auth.refresh_token().await {
                        warn!(error = %e, "refresh after 401 failed");
                        return Err(Error::Unauthorized);
                    }
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    return Err(self.arm_breaker(resp.headers()));
                }
                StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT => {
                    if attempt >= self.retry.max_attempts {
                        warn!(%url, status = status.as_u16(), "gateway still unavailable; giving up");
                        return Err(Error::GatewayUnavailable {
                            status: status.as_u16(),
                            attempts: attempt + 1,
                        });
                    }
                    warn!(%url, status = status.as_u16(), attempt, "gateway unavailable; retrying");
                }
                StatusCode::BAD_REQUEST
                | StatusCode::NOT_FOUND
                | StatusCode::CONFLICT
                | StatusCode::UNPROCESSABLE_ENTITY => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Client {
                        status: status.as_u16(),
                        body,
                    });
                }
                _ => {
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::UnexpectedStatus {
                        status: status.as_u16(),
                        body,
                    });
                }
            }

            tokio::time::sleep(self.retry.backoff(attempt)).await;
            attempt += 1;
        }
    }

    fn record_rate_limit(&self, headers: &HeaderMap) {
        if let Some(status) = RateLimitStatus::from_headers(headers) {
            self.rate_limit.store(Arc::new(status));
            let _ = self.events.send(ApiEvent::RateLimit(status));
        }
    }

    fn arm_breaker(&self, headers: &HeaderMap) -> Error {
        let requested = retry_after(headers).unwrap_or(self.retry.default_retry_after.as_secs());
        let secs = requested.min(self.retry.max_block.as_secs());
        self.breaker.arm(Duration::from_secs(secs));
        warn!(retry_after_secs = secs, "rate limited by API");
        Error::RateLimited {
            retry_after_secs: secs,
        }
    }
}

async fn parse_body(status: StatusCode, resp: reqwest::Response) -> Result<Value, Error> {
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }
    let body = resp.text().await?;
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: preview(&body),
    })
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, Error> {
    let body = preview(&value.to_string());
    serde_json::from_value(value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy::default();
        for attempt in 0..4 {
            let delay = policy.backoff(attempt).as_millis();
            let floor = 1000_u128 << attempt;
            assert!(delay >= floor.min(30_000), "attempt {attempt}: {delay}");
            assert!(delay < (floor + 1000).min(30_001), "attempt {attempt}: {delay}");
        }
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(10), Duration::from_secs(30));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn zero_base_means_no_delay() {
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff(3), Duration::ZERO);
    }
}

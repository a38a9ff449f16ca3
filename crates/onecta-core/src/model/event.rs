// ── Controller events ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use onecta_api::{AuthMode, DeviceUpdate, GroupUpdate, RateLimitStatus};

/// Where a reported error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ErrorSource {
    Auth,
    Api,
    Realtime,
    Device,
}

/// Everything the controller tells its subscribers about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    TokenChanged {
        mode: AuthMode,
        expires_at: Option<DateTime<Utc>>,
    },
    RateLimit(RateLimitStatus),
    Error {
        source: ErrorSource,
        message: String,
    },
    RealtimeConnected,
    RealtimeDisconnected {
        reason: String,
    },
    /// A pushed update that was applied to a known device.
    DeviceUpdated(DeviceUpdate),
    GroupUpdated(GroupUpdate),
    /// A refetch produced a snapshot different from the last one seen.
    DeviceChanged {
        id: String,
    },
    /// The refresh token was rejected and the stored record discarded.
    ReauthRequired {
        mode: AuthMode,
    },
}

// onecta-core: Live device mirror and controller facade over onecta-api.

pub mod config;
pub mod controller;
pub mod error;
pub mod model;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthSettings, ControllerConfig};
pub use controller::{AuthHandle, Controller};
pub use error::CoreError;
pub use model::{
    ControllerEvent, Device, DeviceTracker, ErrorSource, GATEWAY_MANAGEMENT_POINT, Severity,
    TrackedError,
};

// Types consumers need alongside the facade.
pub use onecta_api::{AuthMode, Characteristic, RateLimitStatus, RealtimeState};

// onecta-api: Async Rust client for the Daikin Onecta cloud (OAuth, REST, realtime)

pub mod auth;
pub mod error;
pub mod realtime;
pub mod rest;
pub mod transport;

pub use auth::{
    AppAuth, AppConfig, AppEndpoints, AuthEvent, AuthMode, AuthProvider, AuthorizationRequest,
    PortalAuth, PortalConfig, PortalEndpoints, TokenSet, TokenStore,
};
pub use error::Error;
pub use realtime::{
    DeviceUpdate, GroupUpdate, ReconnectConfig, RealtimeClient, RealtimeEvent, RealtimeState,
};
pub use rest::{
    ApiEvent, Characteristic, CloudClient, GatewayDevice, ManagementPoint, RateLimitStatus,
    RetryPolicy,
};
pub use transport::TransportConfig;

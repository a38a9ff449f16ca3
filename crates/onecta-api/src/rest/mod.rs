// REST access to the gateway-devices API.

pub mod client;
pub mod models;
pub mod rate_limit;

pub use client::{ApiEvent, CloudClient, DEFAULT_API_BASE, RetryPolicy};
pub use models::{Characteristic, GatewayDevice, ManagementPoint};
pub use rate_limit::RateLimitStatus;

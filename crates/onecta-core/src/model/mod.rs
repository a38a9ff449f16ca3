// ── Domain model ──
//
// The live device mirror, the path accessor it reads through, change
// tracking, and the events the controller publishes.

pub mod device;
pub mod event;
mod path;
pub mod tracker;

pub use device::{Device, GATEWAY_MANAGEMENT_POINT};
pub use event::{ControllerEvent, ErrorSource};
pub use tracker::{DeviceTracker, Severity, TrackedError};

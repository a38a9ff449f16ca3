// ── Live device mirror ──
//
// One `Device` per gateway device. The raw cloud snapshot sits behind a
// lock that is never held across an await, so readers always see a whole
// characteristic, old or new. Writes go to the cloud; the local tree only
// changes through realtime updates and reconciliation.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;

use onecta_api::{Characteristic, CloudClient, DeviceUpdate, GatewayDevice};

use super::path::{merge_characteristic, resolve, to_characteristic};
use super::tracker::{DeviceTracker, Severity, TrackedError};
use crate::error::CoreError;

/// Management point that carries the device's display name.
pub const GATEWAY_MANAGEMENT_POINT: &str = "gateway";

struct DeviceState {
    data: GatewayDevice,
    last_updated: DateTime<Utc>,
}

pub struct Device {
    id: String,
    client: Arc<CloudClient>,
    state: RwLock<DeviceState>,
    tracker: Mutex<DeviceTracker>,
    version: watch::Sender<u64>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("version", &*self.version.borrow())
            .finish_non_exhaustive()
    }
}

impl Device {
    pub fn new(data: GatewayDevice, client: Arc<CloudClient>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            id: data.id.clone(),
            client,
            state: RwLock::new(DeviceState {
                data,
                last_updated: Utc::now(),
            }),
            tracker: Mutex::new(DeviceTracker::new()),
            version,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name from the gateway management point.
    pub fn name(&self) -> Option<String> {
        self.get_data(GATEWAY_MANAGEMENT_POINT, "name", None)
            .as_str()
            .map(ToOwned::to_owned)
    }

    pub fn model(&self) -> Option<String> {
        self.read().data.device_model.clone()
    }

    /// Whether the cloud currently reaches the device. Unknown counts as
    /// offline.
    pub fn is_online(&self) -> bool {
        self.read()
            .data
            .is_cloud_connection_up
            .as_ref()
            .and_then(Characteristic::as_bool)
            .unwrap_or(false)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.read().last_updated
    }

    pub fn management_point_ids(&self) -> Vec<String> {
        self.read()
            .data
            .management_points
            .iter()
            .map(|mp| mp.embedded_id.clone())
            .collect()
    }

    /// A copy of the raw cloud snapshot.
    pub fn snapshot(&self) -> GatewayDevice {
        self.read().data.clone()
    }

    /// Bumped on every local change.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Read a characteristic, or a nested node of it when `path` is set.
    /// Anything missing yields an absent characteristic.
    pub fn get_data(
        &self,
        management_point: &str,
        characteristic: &str,
        path: Option<&str>,
    ) -> Characteristic {
        let state = self.read();
        let Some(node) = state
            .data
            .management_point(management_point)
            .and_then(|mp| mp.characteristics.get(characteristic))
        else {
            return Characteristic::default();
        };

        match path {
            Some(path) => resolve(node, path).map(to_characteristic).unwrap_or_default(),
            None => to_characteristic(node),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Write a value through the cloud API. The local tree is left for the
    /// realtime echo or the next fetch to update.
    pub async fn set_data(
        &self,
        management_point: &str,
        characteristic: &str,
        value: Value,
        path: Option<&str>,
    ) -> Result<(), CoreError> {
        let result = self
            .client
            .update_device(&self.id, management_point, characteristic, value, path)
            .await;

        match result {
            Ok(()) => {
                self.write().last_updated = Utc::now();
                Ok(())
            }
            Err(e) => {
                let operation = match path {
                    Some(path) => format!("set {management_point}/{characteristic}{path}"),
                    None => format!("set {management_point}/{characteristic}"),
                };
                self.record_error(TrackedError::new(operation, e.to_string(), Severity::Error));
                Err(e.into())
            }
        }
    }

    /// Merge a pushed update. Returns `false` when the management point is
    /// unknown and the update was dropped.
    pub fn apply_realtime_update(&self, update: &DeviceUpdate) -> bool {
        {
            let mut state = self.write();
            let Some(mp) = state
                .data
                .management_points
                .iter_mut()
                .find(|mp| mp.embedded_id == update.embedded_id)
            else {
                debug!(
                    device = %self.id,
                    embedded_id = %update.embedded_id,
                    "update for unknown management point dropped"
                );
                return false;
            };

            let target = mp
                .characteristics
                .entry(update.characteristic_name.clone())
                .or_insert(Value::Null);
            merge_characteristic(target, &update.data);
            state.last_updated = Utc::now();
        }
        self.version.send_modify(|v| *v += 1);
        true
    }

    /// Swap in a freshly fetched snapshot.
    pub fn replace_snapshot(&self, data: GatewayDevice) {
        {
            let mut state = self.write();
            state.data = data;
            state.last_updated = Utc::now();
        }
        self.version.send_modify(|v| *v += 1);
    }

    // ── Tracking ─────────────────────────────────────────────────────

    /// Compare the current snapshot with the one seen at the last call.
    pub fn has_changed(&self) -> bool {
        let state = self.read();
        self.tracker().has_changed(&state.data)
    }

    pub fn record_error(&self, error: TrackedError) {
        self.tracker().record_error(error);
    }

    pub fn errors(&self) -> Vec<TrackedError> {
        self.tracker().errors()
    }

    // ── Lock helpers ─────────────────────────────────────────────────

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DeviceState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DeviceState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker(&self) -> std::sync::MutexGuard<'_, DeviceTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Controller ──
//
// Composition root for one cloud account: picks the auth flow from
// configuration, wires it into the REST and realtime clients, keeps the
// live device mirror, and republishes everything as `ControllerEvent`s.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use onecta_api::{
    ApiEvent, AppAuth, AuthEvent, AuthMode, AuthProvider, Characteristic, CloudClient,
    GatewayDevice, PortalAuth, RateLimitStatus, RealtimeClient, RealtimeEvent, RealtimeState,
    TokenStore, TransportConfig,
};

use crate::config::{AuthSettings, ControllerConfig};
use crate::error::CoreError;
use crate::model::{ControllerEvent, Device, ErrorSource, Severity, TrackedError};

const EVENT_CHANNEL_SIZE: usize = 256;

type DeviceMap = DashMap<String, Arc<Device>>;

// ── AuthHandle ───────────────────────────────────────────────────

/// The configured auth flow, for flow-specific operations such as
/// building an authorize URL or running the app login.
#[derive(Clone)]
pub enum AuthHandle {
    Portal(PortalAuth),
    App(AppAuth),
}

impl AuthHandle {
    pub fn mode(&self) -> AuthMode {
        match self {
            Self::Portal(_) => AuthMode::Portal,
            Self::App(_) => AuthMode::App,
        }
    }

    pub fn as_portal(&self) -> Option<&PortalAuth> {
        match self {
            Self::Portal(portal) => Some(portal),
            Self::App(_) => None,
        }
    }

    pub fn as_app(&self) -> Option<&AppAuth> {
        match self {
            Self::App(app) => Some(app),
            Self::Portal(_) => None,
        }
    }

    fn provider(&self) -> Arc<dyn AuthProvider> {
        match self {
            Self::Portal(portal) => Arc::new(portal.clone()),
            Self::App(app) => Arc::new(app.clone()),
        }
    }
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers. Cheaply cloneable.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    auth: AuthHandle,
    provider: Arc<dyn AuthProvider>,
    client: Arc<CloudClient>,
    realtime: RealtimeClient,
    devices: Arc<DeviceMap>,
    events: broadcast::Sender<ControllerEvent>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

// Dropping without `shutdown` still stops the realtime reconnect loop.
impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.realtime.close();
        self.cancel.cancel();
    }
}

impl Controller {
    /// Build the clients and start forwarding their events. Does no
    /// network I/O; must be called from inside a tokio runtime.
    pub fn new(config: ControllerConfig) -> Result<Self, CoreError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| CoreError::Internal(format!("controller needs a tokio runtime: {e}")))?;

        let store = TokenStore::new(config.token_path.clone());
        let transport = TransportConfig {
            timeout: config.timeout,
            ..TransportConfig::default()
        };
        let auth = match &config.auth {
            AuthSettings::Portal(portal) => {
                AuthHandle::Portal(PortalAuth::new(portal.clone(), store, &transport)?)
            }
            AuthSettings::App { config: app, .. } => {
                AuthHandle::App(AppAuth::new(app.clone(), store, &transport)?)
            }
        };
        let provider = auth.provider();

        let client = Arc::new(CloudClient::new(
            config.api_base.as_str(),
            Arc::clone(&provider),
            &transport,
            config.retry.clone(),
        )?);
        let realtime = RealtimeClient::new(
            config.realtime_url.clone(),
            Arc::clone(&provider),
            config.reconnect.clone(),
        );

        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let devices = Arc::new(DeviceMap::new());
        let cancel = CancellationToken::new();

        let forwarder = Forwarder {
            events: events.clone(),
            devices: Arc::clone(&devices),
            cancel: cancel.clone(),
        };
        let handles = vec![
            runtime.spawn(forward_auth(
                forwarder.clone(),
                Arc::clone(&provider),
                provider.subscribe(),
            )),
            runtime.spawn(forward_api(forwarder.clone(), client.subscribe())),
            runtime.spawn(forward_realtime(forwarder, realtime.subscribe())),
        ];

        debug!(mode = %auth.mode(), api = %config.api_base, "controller created");

        Ok(Self {
            inner: Arc::new(ControllerInner {
                config,
                auth,
                provider,
                client,
                realtime,
                devices,
                events,
                cancel,
                task_handles: Mutex::new(handles),
            }),
        })
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// The configured flow, for login and logout.
    pub fn auth(&self) -> &AuthHandle {
        &self.inner.auth
    }

    pub fn provider(&self) -> &Arc<dyn AuthProvider> {
        &self.inner.provider
    }

    pub fn client(&self) -> &Arc<CloudClient> {
        &self.inner.client
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Initial fetch, then the realtime channel if enabled.
    pub async fn start(&self) -> Result<Vec<Arc<Device>>, CoreError> {
        let devices = self.devices().await?;
        if self.inner.config.realtime_enabled {
            self.enable_realtime().await?;
        }
        info!(devices = devices.len(), "controller started");
        Ok(devices)
    }

    /// Close the realtime channel and stop all forwarding tasks.
    pub async fn shutdown(&self) {
        self.inner.realtime.disconnect().await;
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("controller shut down");
    }

    // ── Devices ──────────────────────────────────────────────────

    /// Fetch every device and reconcile the mirror: known devices are
    /// updated in place, new ones added, vanished ones dropped.
    pub async fn devices(&self) -> Result<Vec<Arc<Device>>, CoreError> {
        let fetched = match self.inner.client.get_devices().await {
            Ok(fetched) => fetched,
            Err(e) => {
                self.emit_error(ErrorSource::Api, e.to_string());
                return Err(e.into());
            }
        };

        let mut seen = HashSet::with_capacity(fetched.len());
        let mut result = Vec::with_capacity(fetched.len());
        for data in fetched {
            seen.insert(data.id.clone());
            result.push(self.upsert(data));
        }

        self.inner.devices.retain(|id, _| {
            let keep = seen.contains(id);
            if !keep {
                debug!(device = %id, "device no longer listed, dropping");
            }
            keep
        });

        debug!(devices = result.len(), "device refresh complete");
        Ok(result)
    }

    /// A single device: from the mirror when known, else fetched.
    pub async fn device(&self, id: &str) -> Result<Arc<Device>, CoreError> {
        if let Some(device) = self.cached_device(id) {
            return Ok(device);
        }
        match self.inner.client.get_device(id).await {
            Ok(data) => Ok(self.upsert(data)),
            Err(onecta_api::Error::Client { status: 404, .. }) => Err(CoreError::DeviceNotFound {
                identifier: id.to_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn cached_device(&self, id: &str) -> Option<Arc<Device>> {
        self.inner.devices.get(id).map(|d| Arc::clone(d.value()))
    }

    /// The mirror, ordered by id.
    pub fn cached_devices(&self) -> Vec<Arc<Device>> {
        let mut devices: Vec<Arc<Device>> = self
            .inner
            .devices
            .iter()
            .map(|d| Arc::clone(d.value()))
            .collect();
        devices.sort_by(|a, b| a.id().cmp(b.id()));
        devices
    }

    pub async fn get_data(
        &self,
        device_id: &str,
        management_point: &str,
        characteristic: &str,
        path: Option<&str>,
    ) -> Result<Characteristic, CoreError> {
        let device = self.device(device_id).await?;
        Ok(device.get_data(management_point, characteristic, path))
    }

    pub async fn set_data(
        &self,
        device_id: &str,
        management_point: &str,
        characteristic: &str,
        value: Value,
        path: Option<&str>,
    ) -> Result<(), CoreError> {
        let device = self.device(device_id).await?;
        let result = device
            .set_data(management_point, characteristic, value, path)
            .await;
        if let Err(ref e) = result {
            warn!(device = %device_id, error = %e, "write failed");
            self.emit_error(ErrorSource::Device, e.to_string());
        }
        result
    }

    fn upsert(&self, data: GatewayDevice) -> Arc<Device> {
        let id = data.id.clone();
        let device = match self.inner.devices.entry(id.clone()) {
            Entry::Occupied(entry) => {
                let device = Arc::clone(entry.get());
                drop(entry);
                device.replace_snapshot(data);
                device
            }
            Entry::Vacant(entry) => {
                let device = Arc::new(Device::new(data, Arc::clone(&self.inner.client)));
                entry.insert(Arc::clone(&device));
                device
            }
        };

        if device.has_changed() {
            debug!(device = %id, "device snapshot changed");
            let _ = self.inner.events.send(ControllerEvent::DeviceChanged { id });
        }
        device
    }

    // ── Realtime ─────────────────────────────────────────────────

    pub async fn enable_realtime(&self) -> Result<(), CoreError> {
        self.inner.realtime.connect().await?;
        Ok(())
    }

    pub async fn disable_realtime(&self) {
        self.inner.realtime.disconnect().await;
    }

    pub fn realtime_state(&self) -> RealtimeState {
        self.inner.realtime.state()
    }

    pub fn watch_realtime_state(&self) -> watch::Receiver<RealtimeState> {
        self.inner.realtime.watch_state()
    }

    // ── Status ───────────────────────────────────────────────────

    pub async fn is_authenticated(&self) -> bool {
        self.inner.provider.is_authenticated().await
    }

    pub async fn token_expiration(&self) -> Option<DateTime<Utc>> {
        self.inner.provider.token_expiration().await
    }

    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.inner.client.rate_limit_status()
    }

    pub fn events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    fn emit_error(&self, source: ErrorSource, message: String) {
        let _ = self
            .inner
            .events
            .send(ControllerEvent::Error { source, message });
    }
}

// ── Event forwarding ─────────────────────────────────────────────

#[derive(Clone)]
struct Forwarder {
    events: broadcast::Sender<ControllerEvent>,
    devices: Arc<DeviceMap>,
    cancel: CancellationToken,
}

impl Forwarder {
    fn emit(&self, event: ControllerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Next event from `rx`, or `None` once cancelled or closed.
    async fn next<T: Clone>(&self, rx: &mut broadcast::Receiver<T>, source: &str) -> Option<T> {
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return None,
                received = rx.recv() => match received {
                    Ok(event) => return Some(event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(source, skipped, "event forwarder lagged");
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}

async fn forward_auth(
    fwd: Forwarder,
    provider: Arc<dyn AuthProvider>,
    mut rx: broadcast::Receiver<AuthEvent>,
) {
    while let Some(event) = fwd.next(&mut rx, "auth").await {
        match event {
            AuthEvent::TokenChanged { mode, expires_at } => {
                fwd.emit(ControllerEvent::TokenChanged { mode, expires_at });
            }
            AuthEvent::RefreshFailed {
                mode,
                message,
                invalid_grant,
            } => {
                for device in fwd.devices.iter() {
                    device.record_error(TrackedError::new(
                        "refresh token",
                        message.clone(),
                        Severity::Warning,
                    ));
                }
                fwd.emit(ControllerEvent::Error {
                    source: ErrorSource::Auth,
                    message,
                });

                if invalid_grant {
                    warn!(%mode, "refresh token rejected, discarding stored credentials");
                    if let Err(e) = provider.clear_credentials().await {
                        warn!(error = %e, "failed to delete token file");
                    }
                    fwd.emit(ControllerEvent::ReauthRequired { mode });
                }
            }
            AuthEvent::CredentialsCleared { mode } => {
                debug!(%mode, "credentials cleared");
            }
        }
    }
}

async fn forward_api(fwd: Forwarder, mut rx: broadcast::Receiver<ApiEvent>) {
    while let Some(event) = fwd.next(&mut rx, "api").await {
        match event {
            ApiEvent::RateLimit(status) => fwd.emit(ControllerEvent::RateLimit(status)),
        }
    }
}

async fn forward_realtime(fwd: Forwarder, mut rx: broadcast::Receiver<RealtimeEvent>) {
    while let Some(event) = fwd.next(&mut rx, "realtime").await {
        match event {
            RealtimeEvent::Connected => fwd.emit(ControllerEvent::RealtimeConnected),
            RealtimeEvent::Disconnected { reason } => {
                fwd.emit(ControllerEvent::RealtimeDisconnected { reason });
            }
            RealtimeEvent::DeviceUpdate(update) => {
                let device = fwd
                    .devices
                    .get(&update.device_id)
                    .map(|d| Arc::clone(d.value()));
                match device {
                    Some(device) => {
                        if device.apply_realtime_update(&update) {
                            fwd.emit(ControllerEvent::DeviceUpdated(update));
                        }
                    }
                    None => debug!(device = %update.device_id, "update for unknown device dropped"),
                }
            }
            RealtimeEvent::GroupUpdate(update) => fwd.emit(ControllerEvent::GroupUpdated(update)),
            RealtimeEvent::Error(message) => fwd.emit(ControllerEvent::Error {
                source: ErrorSource::Realtime,
                message,
            }),
            RealtimeEvent::GaveUp { failures } => fwd.emit(ControllerEvent::Error {
                source: ErrorSource::Realtime,
                message: format!("realtime reconnect gave up after {failures} failures"),
            }),
        }
    }
}

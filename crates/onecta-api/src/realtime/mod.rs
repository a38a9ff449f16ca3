//! Realtime push channel with heartbeat and auto-reconnect.
//!
//! Opens one WebSocket to the cloud's push endpoint, authenticated with
//! the current bearer token, and streams parsed updates through a
//! [`tokio::sync::broadcast`] channel. Reconnection uses a doubling delay
//! and gives up after a run of consecutive failures.
//!
//! # Example
//!
//! ```rust,ignore
//! let realtime = RealtimeClient::new(url, auth, ReconnectConfig::default());
//! let mut rx = realtime.subscribe();
//! realtime.connect().await?;
//!
//! while let Ok(event) = rx.recv().await {
//!     if let RealtimeEvent::DeviceUpdate(update) = event {
//!         println!("{} {}", update.device_id, update.characteristic_name);
//!     }
//! }
//! ```

mod frames;
mod state;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

pub use frames::{DEVICE_UPDATE_EVENT, DeviceUpdate, GROUP_UPDATE_EVENT, GroupUpdate};
pub use state::{
    Backoff, IllegalTransition, ReconnectConfig, ReconnectSchedule, RealtimeState, Transition,
};

use crate::auth::AuthProvider;
use crate::error::Error;
use frames::{Frame, parse_frame};

pub const DEFAULT_REALTIME_URL: &str = "wss://wsapi.onecta.daikineurope.com";

const EVENT_CHANNEL_CAPACITY: usize = 1024;

// ── Events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    Disconnected { reason: String },
    DeviceUpdate(DeviceUpdate),
    GroupUpdate(GroupUpdate),
    Error(String),
    /// Reconnecting stopped after this many consecutive failures.
    GaveUp { failures: u32 },
}

// ── Client ───────────────────────────────────────────────────────────

struct RealtimeInner {
    url: Url,
    auth: Arc<dyn AuthProvider>,
    config: ReconnectConfig,
    events: broadcast::Sender<RealtimeEvent>,
    state: watch::Sender<RealtimeState>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    /// Parent of every connection task's token; cancelled by `close`.
    closed: CancellationToken,
}

/// Handle to the realtime channel. Cheaply cloneable.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<RealtimeInner>,
}

impl RealtimeClient {
    pub fn new(url: Url, auth: Arc<dyn AuthProvider>, config: ReconnectConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(RealtimeState::Disconnected);
        Self {
            inner: Arc::new(RealtimeInner {
                url,
                auth,
                config,
                events,
                state,
                task: Mutex::new(None),
                closed: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> RealtimeState {
        *self.inner.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RealtimeState> {
        self.inner.state.subscribe()
    }

    /// Start the connection task. A no-op while already connecting,
    /// connected, or waiting to reconnect.
    ///
    /// Fails with [`Error::AuthRequired`] when no token is available; the
    /// state stays `Disconnected` in that case.
    pub async fn connect(&self) -> Result<(), Error> {
        let mut task = self.inner.task.lock().await;
        if self.inner.closed.is_cancelled() {
            return Err(Error::Realtime("realtime client is closed".into()));
        }
        if self.state().is_active() {
            debug!(state = ?self.state(), "realtime already active");
            return Ok(());
        }

        let token = self.inner.auth.access_token().await?;
        self.inner.transition(Transition::Connect)?;

        let cancel = self.inner.closed.child_token();
        let inner = Arc::clone(&self.inner);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            inner.run(task_cancel, token).await;
        });
        *task = Some((cancel, handle));
        Ok(())
    }

    /// Stop the connection task and any pending reconnect.
    pub async fn disconnect(&self) {
        let mut task = self.inner.task.lock().await;
        if let Some((cancel, handle)) = task.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "realtime task ended abnormally");
            }
        }

        self.inner.mark_disconnected();
    }

    /// Stop the connection task and any pending reconnect without waiting
    /// for it. Safe to call from synchronous code such as `Drop`; later
    /// `connect` calls fail.
    pub fn close(&self) {
        if !self.inner.closed.is_cancelled() {
            debug!("closing realtime client");
            self.inner.closed.cancel();
        }
    }
}

// ── Connection task ──────────────────────────────────────────────────

/// How a session ended.
struct SessionEnd {
    opened: bool,
    reason: String,
}

impl RealtimeInner {
    fn transition(&self, transition: Transition) -> Result<RealtimeState, Error> {
        let mut result = Ok(RealtimeState::Disconnected);
        self.state.send_modify(|state| match state.on(transition) {
            Ok(next) => {
                *state = next;
                result = Ok(next);
            }
            Err(e) => result = Err(Error::Realtime(e.to_string())),
        });
        result
    }

    fn mark_disconnected(&self) {
        let previous = self.state.send_replace(RealtimeState::Disconnected);
        if previous.is_active() {
            info!("realtime disconnected");
            self.emit(RealtimeEvent::Disconnected {
                reason: "disconnected by client".into(),
            });
        }
    }

    fn emit(&self, event: RealtimeEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Connect, read until the session ends, back off, repeat.
    async fn run(&self, cancel: CancellationToken, first_token: SecretString) {
        let mut schedule = ReconnectSchedule::new(&self.config);
        let mut token = Some(first_token);

        loop {
            let end = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                end = self.session(token.take(), &mut schedule, &cancel) => end,
            };

            if end.opened {
                info!(reason = %end.reason, "realtime session ended");
                self.emit(RealtimeEvent::Disconnected { reason: end.reason });
            }

            match schedule.on_close() {
                Backoff::GiveUp { failures } => {
                    error!(failures, "realtime reconnect limit reached, giving up");
                    if let Err(e) = self.transition(Transition::GiveUp) {
                        warn!(error = %e, "realtime state out of sync");
                    }
                    self.emit(RealtimeEvent::GaveUp { failures });
                    break;
                }
                Backoff::Retry { delay, attempt } => {
                    if let Err(e) = self.transition(Transition::Closed { attempt }) {
                        warn!(error = %e, "realtime state out of sync");
                    }
                    info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt,
                        "waiting before realtime reconnect"
                    );

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }

                    if let Err(e) = self.transition(Transition::Retry) {
                        warn!(error = %e, "realtime state out of sync");
                    }
                }
            }
        }

        if cancel.is_cancelled() {
            self.mark_disconnected();
        }
        debug!("realtime task exiting");
    }

    /// One connection attempt and, if it opens, the connected session.
    async fn session(
        &self,
        token: Option<SecretString>,
        schedule: &mut ReconnectSchedule,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let token = match token {
            Some(token) => token,
            None => match self.auth.access_token().await {
                Ok(token) => token,
                Err(e) => return self.failed(format!("no access token: {e}")),
            },
        };

        info!(url = %self.url, "connecting realtime channel");
        let uri: tungstenite::http::Uri = match self.url.as_str().parse() {
            Ok(uri) => uri,
            Err(e) => return self.failed(format!("invalid realtime URL: {e}")),
        };
        let request = ClientRequestBuilder::new(uri).with_header(
            "Authorization",
            format!("Bearer {}", token.expose_secret()),
        );

        let stream = match tokio_tungstenite::connect_async(request).await {
            Ok((stream, _response)) => stream,
            Err(e) => return self.failed(format!("realtime connect failed: {e}")),
        };

        schedule.on_open();
        if let Err(e) = self.transition(Transition::Opened) {
            warn!(error = %e, "realtime state out of sync");
        }
        info!("realtime channel connected");
        self.emit(RealtimeEvent::Connected);

        let reason = match self.read_loop(stream, cancel).await {
            Ok(reason) => reason,
            Err(e) => {
                warn!(error = %e, "realtime session error");
                self.emit(RealtimeEvent::Error(e.to_string()));
                e.to_string()
            }
        };
        SessionEnd {
            opened: true,
            reason,
        }
    }

    fn failed(&self, message: String) -> SessionEnd {
        warn!(error = %message, "realtime connection attempt failed");
        self.emit(RealtimeEvent::Error(message.clone()));
        SessionEnd {
            opened: false,
            reason: message,
        }
    }

    /// Read frames and run the heartbeat until the socket closes.
    async fn read_loop<S>(
        &self,
        stream: tokio_tungstenite::WebSocketStream<S>,
        cancel: &CancellationToken,
    ) -> Result<String, Error>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
    {
        let (mut write, mut read) = stream.split();

        let period = self.config.ping_interval;
        let mut ping = tokio::time::interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        loop {
            let deadline = pong_deadline;
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok("disconnected by client".into());
                }
                () = wait_until(deadline) => {
                    warn!("no pong from realtime server, dropping connection");
                    return Err(Error::Realtime("heartbeat timed out".into()));
                }
                _ = ping.tick() => {
                    if pong_deadline.is_none() {
                        trace!("realtime ping");
                        write
                            .send(Message::Ping(Vec::new().into()))
                            .await
                            .map_err(|e| Error::Realtime(e.to_string()))?;
                        pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                    }
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Pong(_))) => {
                        trace!("realtime pong");
                        pong_deadline = None;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "closed by server".to_owned(),
                            |cf| format!("closed by server ({}): {}", cf.code, cf.reason),
                        );
                        return Ok(reason);
                    }
                    Some(Ok(_)) => {
                        // Binary and ping frames; tungstenite answers pings itself.
                    }
                    Some(Err(e)) => return Err(Error::Realtime(e.to_string())),
                    None => return Ok("stream ended".into()),
                },
            }
        }
    }

    fn dispatch(&self, text: &str) {
        match parse_frame(text) {
            Some(Frame::DeviceUpdate(update)) => {
                trace!(
                    device = %update.device_id,
                    embedded_id = %update.embedded_id,
                    characteristic = %update.characteristic_name,
                    "device update"
                );
                self.emit(RealtimeEvent::DeviceUpdate(update));
            }
            Some(Frame::GroupUpdate(update)) => {
                trace!(group = %update.group_id, "group update");
                self.emit(RealtimeEvent::GroupUpdate(update));
            }
            None => {}
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

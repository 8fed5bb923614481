// =============================================================================
// Connection Manager — supervised WebSocket link to the engine feed
// =============================================================================
//
// Owns exactly one logical transport connection at a time and translates raw
// socket events into typed `InboundMessage`s on the bus. Transport faults are
// recovered through an exponential-backoff reconnect schedule; an explicit
// local `disconnect()` suppresses any further automatic reconnection until
// the next `connect()`.
//
// The reconnect delay is a spawned, abortable timer task. At most one pending
// timer exists per manager, and `disconnect()` aborts it so a cancelled timer
// never performs work.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::config::SyncConfig;
use crate::types::{ConnectionState, InboundMessage, LifecycleStatus, SnapshotPatch};

// =============================================================================
// ReconnectPolicy
// =============================================================================

/// Pure retry accounting for the reconnect schedule.
///
/// The delay for the n-th consecutive failure (1-indexed) is
/// `base_delay * growth_factor^(n-1)`, uncapped and unjittered so the
/// schedule is fully deterministic.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    growth_factor: f64,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, growth_factor: f64, max_attempts: u32) -> Self {
        Self {
            base_delay,
            growth_factor,
            max_attempts,
            attempts: 0,
        }
    }

    /// Record one failed attempt and return the delay before the next try,
    /// or `None` once the attempt budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        let factor = self.growth_factor.powi(self.attempts as i32 - 1);
        Some(self.base_delay.mul_f64(factor))
    }

    /// A successful open clears the failure streak.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Supervises the single WebSocket link to the engine and publishes every
/// inbound event to the bus. Cheap to clone; clones drive the same link.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    url: String,
    bus: EventBus,
    state: RwLock<ConnectionState>,
    policy: Mutex<ReconnectPolicy>,
    /// Set before requesting a local close; cleared on the next `connect()`.
    /// While set, transport closure must not trigger a reconnect.
    intentionally_closed: AtomicBool,
    /// Pending backoff timer, if any. At most one exists at a time.
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    /// Task driving the live socket, if any.
    link_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: &SyncConfig, bus: EventBus) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                url: config.ws_url.clone(),
                bus,
                state: RwLock::new(ConnectionState::Disconnected),
                policy: Mutex::new(ReconnectPolicy::new(
                    config.reconnect_base_delay(),
                    config.reconnect_growth_factor,
                    config.max_reconnect_attempts,
                )),
                intentionally_closed: AtomicBool::new(false),
                reconnect_timer: Mutex::new(None),
                link_task: Mutex::new(None),
            }),
        }
    }

    /// Begin connecting (also the way out of `Failed`). A no-op while a link
    /// is already open or being established.
    pub fn connect(&self) {
        {
            let state = *self.inner.state.read();
            if matches!(state, ConnectionState::Connecting | ConnectionState::Open) {
                debug!(state = %state, "connect() ignored; link already active");
                return;
            }
        }

        self.inner.intentionally_closed.store(false, Ordering::SeqCst);
        self.inner.policy.lock().reset();
        // An explicit connect supersedes any scheduled retry.
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
        self.spawn_link();
    }

    /// Intentionally close the link. Idempotent; moves to `Disconnected`
    /// from any state, cancels the pending reconnect timer, and releases the
    /// transport handle. Consumers still observe the close as a
    /// `Lifecycle{Disconnected}` — only the auto-reconnect is suppressed.
    pub fn disconnect(&self) {
        self.inner.intentionally_closed.store(true, Ordering::SeqCst);
        if let Some(timer) = self.inner.reconnect_timer.lock().take() {
            timer.abort();
        }
        if let Some(link) = self.inner.link_task.lock().take() {
            link.abort();
        }

        let previous = std::mem::replace(
            &mut *self.inner.state.write(),
            ConnectionState::Disconnected,
        );
        info!("engine link closed locally");

        // Publish with no locks held; a callback may re-enter the manager.
        // An already-disconnected manager has nothing to announce.
        if previous != ConnectionState::Disconnected {
            self.inner.bus.publish(&InboundMessage::Lifecycle {
                status: LifecycleStatus::Disconnected,
                detail: None,
            });
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Whether a backoff timer is currently armed.
    pub fn has_pending_reconnect(&self) -> bool {
        self.inner
            .reconnect_timer
            .lock()
            .as_ref()
            .map_or(false, |timer| !timer.is_finished())
    }

    // -------------------------------------------------------------------------
    // Link lifecycle
    // -------------------------------------------------------------------------

    fn spawn_link(&self) {
        // The flag is checked under the link lock: `disconnect()` sets it
        // before taking this lock, so a stale reconnect timer that lost the
        // race can no longer bring up a link.
        let mut link = self.inner.link_task.lock();
        if self.inner.intentionally_closed.load(Ordering::SeqCst) {
            debug!("link spawn suppressed after local disconnect");
            return;
        }

        *self.inner.state.write() = ConnectionState::Connecting;
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.run_link().await;
        });
        // At most one live transport per manager.
        if let Some(old) = link.replace(handle) {
            old.abort();
        }
    }

    /// Drive one connection attempt to completion: handshake, read loop,
    /// then either schedule a reconnect or fall silent after a local close.
    async fn run_link(self) {
        info!(url = %self.inner.url, "connecting to engine WebSocket");

        let ws_stream = match connect_async(&self.inner.url).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(url = %self.inner.url, error = %e, "WebSocket handshake failed");
                self.on_link_down(LifecycleStatus::Error, Some(e.to_string()));
                return;
            }
        };

        // A local disconnect may have landed while the handshake was in
        // flight; drop the socket without announcing it.
        if self.inner.intentionally_closed.load(Ordering::SeqCst) {
            debug!("handshake completed after local disconnect; dropping link");
            return;
        }

        *self.inner.state.write() = ConnectionState::Open;
        self.inner.policy.lock().reset();
        info!("engine WebSocket connected");
        self.inner.bus.publish(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });

        let (_write, mut read) = ws_stream.split();

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<SnapshotPatch>(&text) {
                        Ok(patch) => self.inner.bus.publish(&InboundMessage::Data { patch }),
                        Err(e) => {
                            // Malformed frames are dropped locally; they must
                            // not close the link or surface as a lifecycle
                            // error.
                            warn!(error = %e, "dropping malformed feed frame");
                        }
                    }
                }
                Some(Ok(_)) => {} // binary / ping / pong frames carry no state
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket read error");
                    self.on_link_down(LifecycleStatus::Error, Some(e.to_string()));
                    return;
                }
                None => {
                    warn!("WebSocket stream closed by peer");
                    self.on_link_down(LifecycleStatus::Disconnected, None);
                    return;
                }
            }
        }
    }

    /// Transport-level close or error. Publishes the lifecycle notification
    /// and schedules a retry unless the close was locally requested.
    fn on_link_down(&self, status: LifecycleStatus, detail: Option<String>) {
        if self.inner.intentionally_closed.load(Ordering::SeqCst) {
            debug!("link down after local disconnect; no reconnect");
            return;
        }
        self.inner
            .bus
            .publish(&InboundMessage::Lifecycle { status, detail });
        self.schedule_reconnect();
    }

    /// Arm the next attempt after a backoff delay, or give up with `Failed`
    /// once the attempt budget is spent.
    fn schedule_reconnect(&self) {
        let (delay, attempt, max) = {
            let mut policy = self.inner.policy.lock();
            match policy.next_delay() {
                Some(delay) => (delay, policy.attempts(), policy.max_attempts()),
                None => {
                    let max = policy.max_attempts();
                    drop(policy);
                    error!(max_attempts = max, "max reconnection attempts reached");
                    *self.inner.state.write() = ConnectionState::Failed;
                    self.inner.bus.publish(&InboundMessage::Lifecycle {
                        status: LifecycleStatus::Failed,
                        detail: Some("Unable to connect to server".to_string()),
                    });
                    return;
                }
            }
        };

        *self.inner.state.write() = ConnectionState::Reconnecting;
        info!(
            attempt,
            max_attempts = max,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let manager = self.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.inner.intentionally_closed.load(Ordering::SeqCst) {
                return;
            }
            manager.spawn_link();
        });
        if let Some(old) = self.inner.reconnect_timer.lock().replace(timer) {
            old.abort();
        }
    }
}

// =============================================================================
// State Store — throttled merge of feed frames into the live snapshot
// =============================================================================
//
// The single designated consumer of the bus. Turns the message stream into
// the snapshot and trade history the rest of the application reads.
//
// Data frames pass through a minimum-interval throttle: a frame arriving
// inside the window is dropped entirely (never queued or coalesced), so a
// burst of N frames yields exactly one merge using the first payload.
// Lifecycle messages bypass the throttle and touch only the observed
// connection status.
//
// The store is the sole writer; readers get cloned, immutable views.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::bus::{EventBus, Subscription};
use crate::config::SyncConfig;
use crate::types::{
    InboundMessage, LifecycleStatus, SnapshotPatch, SystemSnapshot, TradeRecord,
};

/// Owner of the merged snapshot and trade history. Cheap to clone; clones
/// read and write the same state.
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    snapshot: RwLock<SystemSnapshot>,
    /// Most-recent-first, length never exceeds `trade_capacity`.
    trades: RwLock<Vec<TradeRecord>>,
    /// Connection status as last reported over the bus.
    status: RwLock<LifecycleStatus>,
    last_error: RwLock<Option<String>>,
    /// Timestamp of the last accepted merge. Left untouched by dropped frames.
    last_accepted: Mutex<Option<Instant>>,
    min_update_interval: Duration,
    trade_capacity: usize,
    /// Bumped on every observable change; readers poll it to re-render.
    version: AtomicU64,
}

impl StateStore {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                snapshot: RwLock::new(SystemSnapshot::default()),
                trades: RwLock::new(Vec::new()),
                status: RwLock::new(LifecycleStatus::Disconnected),
                last_error: RwLock::new(None),
                last_accepted: Mutex::new(None),
                min_update_interval: config.min_update_interval(),
                trade_capacity: config.trade_history_capacity,
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe this store to `bus`. Dropping the returned subscription
    /// detaches the store.
    pub fn attach(&self, bus: &EventBus) -> Subscription {
        let store = self.clone();
        bus.subscribe(move |message| store.handle_message(message))
    }

    pub fn handle_message(&self, message: &InboundMessage) {
        match message {
            InboundMessage::Lifecycle { status, detail } => {
                self.apply_lifecycle(*status, detail.clone());
            }
            InboundMessage::Data { patch } => {
                self.apply_data_at(patch, Instant::now());
            }
        }
    }

    /// Lifecycle changes are never throttled and never touch the snapshot.
    fn apply_lifecycle(&self, status: LifecycleStatus, detail: Option<String>) {
        *self.inner.status.write() = status;
        *self.inner.last_error.write() = match status {
            LifecycleStatus::Error | LifecycleStatus::Failed => {
                detail.or_else(|| Some("Connection error".to_string()))
            }
            _ => None,
        };
        self.inner.version.fetch_add(1, Ordering::Relaxed);
    }

    /// Apply a data frame observed at `now`. Returns whether the merge was
    /// accepted by the throttle window.
    pub fn apply_data_at(&self, patch: &SnapshotPatch, now: Instant) -> bool {
        {
            let mut last = self.inner.last_accepted.lock();
            if let Some(prev) = *last {
                if now.duration_since(prev) < self.inner.min_update_interval {
                    debug!("feed frame dropped by throttle window");
                    return false;
                }
            }
            *last = Some(now);
        }

        self.inner.snapshot.write().apply(patch);
        if let Some(trade) = &patch.recent_trade {
            self.push_trade(trade.clone());
        }
        self.inner.version.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn push_trade(&self, trade: TradeRecord) {
        let mut trades = self.inner.trades.write();
        trades.insert(0, trade);
        trades.truncate(self.inner.trade_capacity);
    }

    // -------------------------------------------------------------------------
    // Read-only views
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> SystemSnapshot {
        self.inner.snapshot.read().clone()
    }

    /// Recent trades, most-recent-first.
    pub fn recent_trades(&self) -> Vec<TradeRecord> {
        self.inner.trades.read().clone()
    }

    pub fn status(&self) -> LifecycleStatus {
        *self.inner.status.read()
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> StateStore {
        StateStore::new(&SyncConfig::default())
    }

    fn patch(json: &str) -> SnapshotPatch {
        serde_json::from_str(json).unwrap()
    }

    fn trade_patch(id: &str) -> SnapshotPatch {
        patch(&format!(r#"{{ "recent_trade": {{ "id": "{id}" }} }}"#))
    }

    #[test]
    fn burst_within_window_merges_only_the_first() {
        let store = store();
        let t0 = Instant::now();

        assert!(store.apply_data_at(&patch(r#"{ "latency_us": 50 }"#), t0));
        // Dropped, not coalesced: the second value must never appear.
        assert!(!store.apply_data_at(
            &patch(r#"{ "latency_us": 80 }"#),
            t0 + Duration::from_millis(400)
        ));
        assert!(!store.apply_data_at(
            &patch(r#"{ "latency_us": 99 }"#),
            t0 + Duration::from_millis(999)
        ));
        assert_eq!(store.snapshot().latency_us, 50.0);

        // At exactly the window boundary the frame is accepted again.
        assert!(store.apply_data_at(
            &patch(r#"{ "latency_us": 80 }"#),
            t0 + Duration::from_millis(1000)
        ));
        assert_eq!(store.snapshot().latency_us, 80.0);
    }

    #[test]
    fn dropped_frame_leaves_the_window_anchor_unchanged() {
        let store = store();
        let t0 = Instant::now();

        store.apply_data_at(&patch(r#"{ "latency_us": 1 }"#), t0);
        // A drop at t0+900 must not extend the window: t0+1100 is still
        // >= 1000ms after the last *accepted* frame.
        store.apply_data_at(&patch(r#"{ "latency_us": 2 }"#), t0 + Duration::from_millis(900));
        assert!(store.apply_data_at(
            &patch(r#"{ "latency_us": 3 }"#),
            t0 + Duration::from_millis(1100)
        ));
        assert_eq!(store.snapshot().latency_us, 3.0);
    }

    #[test]
    fn trade_history_is_bounded_most_recent_first() {
        let store = store();
        let t0 = Instant::now();

        for i in 0..25 {
            store.apply_data_at(&trade_patch(&format!("T{i}")), t0 + Duration::from_secs(i));
        }

        let trades = store.recent_trades();
        assert_eq!(trades.len(), 20);
        assert_eq!(trades[0].id, "T24");
        assert_eq!(trades[19].id, "T5");
    }

    #[test]
    fn rejected_frame_does_not_append_its_trade() {
        let store = store();
        let t0 = Instant::now();

        store.apply_data_at(&trade_patch("T1"), t0);
        store.apply_data_at(&trade_patch("T2"), t0 + Duration::from_millis(100));

        let trades = store.recent_trades();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id, "T1");
    }

    #[test]
    fn lifecycle_updates_status_and_error_without_throttling() {
        let store = store();
        assert_eq!(store.status(), LifecycleStatus::Disconnected);

        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });
        assert_eq!(store.status(), LifecycleStatus::Connected);
        assert_eq!(store.last_error(), None);

        // Back-to-back lifecycle messages all land; no window applies.
        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Error,
            detail: Some("socket reset".to_string()),
        });
        assert_eq!(store.status(), LifecycleStatus::Error);
        assert_eq!(store.last_error(), Some("socket reset".to_string()));

        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Failed,
            detail: None,
        });
        assert_eq!(store.last_error(), Some("Connection error".to_string()));

        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });
        assert_eq!(store.last_error(), None);

        // The snapshot itself is untouched by lifecycle traffic.
        assert_eq!(store.snapshot().latency_us, 0.0);
    }

    #[test]
    fn merge_scenario_from_a_live_session() {
        let store = store();
        let t0 = Instant::now();

        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });

        // Two frames inside one window: only the first merges.
        store.apply_data_at(&patch(r#"{ "latency_us": 50 }"#), t0);
        store.apply_data_at(&patch(r#"{ "latency_us": 80 }"#), t0 + Duration::from_millis(600));
        assert_eq!(store.snapshot().latency_us, 50.0);

        // After the window, the next frame lands with its trade.
        store.apply_data_at(
            &patch(
                r#"{ "latency_us": 80, "recent_trade": { "id": "T1", "price": 100.0, "qty": 5 } }"#,
            ),
            t0 + Duration::from_millis(1600),
        );
        assert_eq!(store.snapshot().latency_us, 80.0);
        assert_eq!(store.recent_trades()[0].id, "T1");
    }

    #[test]
    fn attached_store_consumes_bus_traffic() {
        let bus = EventBus::new();
        let store = store();
        let sub = store.attach(&bus);

        bus.publish(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });
        bus.publish(&InboundMessage::Data {
            patch: patch(r#"{ "total_trades": 42 }"#),
        });

        assert_eq!(store.status(), LifecycleStatus::Connected);
        assert_eq!(store.snapshot().total_trades, 42);

        sub.unsubscribe();
        bus.publish(&InboundMessage::Data {
            patch: patch(r#"{ "total_trades": 99 }"#),
        });
        assert_eq!(store.snapshot().total_trades, 42);
    }

    #[test]
    fn version_unchanged_by_dropped_frames() {
        let store = store();
        let t0 = Instant::now();
        let v0 = store.version();

        store.apply_data_at(&patch(r#"{ "latency_us": 1 }"#), t0);
        assert_eq!(store.version(), v0 + 1);

        // A throttled frame is invisible to readers polling the version.
        store.apply_data_at(&patch(r#"{ "latency_us": 2 }"#), t0 + Duration::from_millis(10));
        assert_eq!(store.version(), v0 + 1);

        // Lifecycle changes are observable state too, so they do bump it.
        store.handle_message(&InboundMessage::Lifecycle {
            status: LifecycleStatus::Connected,
            detail: None,
        });
        assert_eq!(store.version(), v0 + 2);
    }
}

// =============================================================================
// Shared types — wire model of the nanopulse engine feed
// =============================================================================
//
// Everything the engine pushes over the WebSocket feed lands here: lifecycle
// notifications, the partial state patches, and the snapshot they merge into.
// Field names follow the engine's JSON contract (snake_case, `qty` not
// `quantity`).
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// Connection lifecycle
// =============================================================================

/// Where the sync layer currently stands with the engine. Exactly one value
/// is active per connection manager at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Status carried by a `Lifecycle` message on the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Connected,
    Error,
    Disconnected,
    Failed,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A message fanned out by the event bus: either a connection lifecycle
/// change or a parsed data frame from the feed.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    Lifecycle {
        status: LifecycleStatus,
        detail: Option<String>,
    },
    Data {
        patch: SnapshotPatch,
    },
}

// =============================================================================
// Orders & trades
// =============================================================================

/// Order side, serialised as the engine expects ("BUY" / "SELL").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// One executed trade as reported by the engine. Immutable once stored.
///
/// Only `id` is required on the wire; everything else defaults so a sparse
/// trade event still parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub qty: i64,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub buyer_id: String,
    #[serde(default)]
    pub seller_id: String,
}

// =============================================================================
// Order books
// =============================================================================

/// A single aggregated price level on one side of a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: i64,
}

/// Per-symbol order book as published by the engine.
///
/// Replaced wholesale whenever a patch carries `order_books`; there is no
/// partial merge within a single symbol's book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookView {
    pub symbol: String,
    #[serde(default)]
    pub buy_book: Vec<PriceLevel>,
    #[serde(default)]
    pub sell_book: Vec<PriceLevel>,
    #[serde(default)]
    pub best_bid: Option<f64>,
    #[serde(default)]
    pub best_ask: Option<f64>,
    #[serde(default)]
    pub spread: Option<f64>,
}

// =============================================================================
// SystemSnapshot & SnapshotPatch
// =============================================================================

/// The latest merged view of engine state. Created all-default at startup and
/// only ever mutated by the state store's merges.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub timestamp: Option<i64>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub spread: Option<f64>,
    pub latency_us: f64,
    pub max_latency_us: f64,
    pub mode: String,
    pub queue_depth: i64,
    pub mm_profit: f64,
    pub total_trades: i64,
    pub order_books: HashMap<String, OrderBookView>,
}

impl Default for SystemSnapshot {
    fn default() -> Self {
        Self {
            timestamp: None,
            best_bid: None,
            best_ask: None,
            spread: None,
            latency_us: 0.0,
            max_latency_us: 0.0,
            mode: "NORMAL".to_string(),
            queue_depth: 0,
            mm_profit: 0.0,
            total_trades: 0,
            order_books: HashMap::new(),
        }
    }
}

/// A partial state update decoded from one feed frame. Every field is
/// optional; absent fields leave the snapshot untouched on merge.
///
/// `recent_trade` is not part of the snapshot itself — the state store peels
/// it off into the trade history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotPatch {
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub best_bid: Option<f64>,
    #[serde(default)]
    pub best_ask: Option<f64>,
    #[serde(default)]
    pub spread: Option<f64>,
    #[serde(default)]
    pub latency_us: Option<f64>,
    #[serde(default)]
    pub max_latency_us: Option<f64>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub queue_depth: Option<i64>,
    #[serde(default)]
    pub mm_profit: Option<f64>,
    #[serde(default)]
    pub total_trades: Option<i64>,
    #[serde(default)]
    pub order_books: Option<HashMap<String, OrderBookView>>,
    #[serde(default)]
    pub recent_trade: Option<TradeRecord>,
}

impl SystemSnapshot {
    /// Shallow-merge `patch` into the snapshot: present fields overwrite,
    /// absent fields are untouched.
    ///
    /// `order_books` is the one exception to field-wise merging — when
    /// present it replaces the previous mapping wholesale, even if symbols
    /// disappear; when absent the previous mapping is retained.
    pub fn apply(&mut self, patch: &SnapshotPatch) {
        if let Some(v) = patch.timestamp {
            self.timestamp = Some(v);
        }
        if let Some(v) = patch.best_bid {
            self.best_bid = Some(v);
        }
        if let Some(v) = patch.best_ask {
            self.best_ask = Some(v);
        }
        if let Some(v) = patch.spread {
            self.spread = Some(v);
        }
        if let Some(v) = patch.latency_us {
            self.latency_us = v;
        }
        if let Some(v) = patch.max_latency_us {
            self.max_latency_us = v;
        }
        if let Some(mode) = &patch.mode {
            self.mode = mode.clone();
        }
        if let Some(v) = patch.queue_depth {
            self.queue_depth = v;
        }
        if let Some(v) = patch.mm_profit {
            self.mm_profit = v;
        }
        if let Some(v) = patch.total_trades {
            self.total_trades = v;
        }
        if let Some(books) = &patch.order_books {
            self.order_books = books.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn patch(json: &str) -> SnapshotPatch {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn default_snapshot_is_neutral() {
        let snap = SystemSnapshot::default();
        assert_eq!(snap.mode, "NORMAL");
        assert_eq!(snap.best_bid, None);
        assert_eq!(snap.total_trades, 0);
        assert!(snap.order_books.is_empty());
    }

    #[test]
    fn apply_overwrites_present_fields_only() {
        let mut snap = SystemSnapshot::default();
        snap.apply(&patch(r#"{ "latency_us": 50, "best_bid": 100.5, "mode": "SAFE" }"#));
        assert_eq!(snap.latency_us, 50.0);
        assert_eq!(snap.best_bid, Some(100.5));
        assert_eq!(snap.mode, "SAFE");

        // A later patch that omits best_bid must not clear it.
        snap.apply(&patch(r#"{ "latency_us": 80 }"#));
        assert_eq!(snap.latency_us, 80.0);
        assert_eq!(snap.best_bid, Some(100.5));
        assert_eq!(snap.mode, "SAFE");
    }

    #[test]
    fn order_books_replaced_wholesale() {
        let mut snap = SystemSnapshot::default();
        snap.apply(&patch(
            r#"{ "order_books": {
                "RELIANCE": { "symbol": "RELIANCE", "buy_book": [{"price": 99.0, "qty": 10}] },
                "TCS":      { "symbol": "TCS" }
            }}"#,
        ));
        assert_eq!(snap.order_books.len(), 2);

        // Patch without order_books retains the mapping.
        snap.apply(&patch(r#"{ "latency_us": 12 }"#));
        assert_eq!(snap.order_books.len(), 2);

        // Patch with order_books replaces it, dropping symbols it omits.
        snap.apply(&patch(
            r#"{ "order_books": { "INFY": { "symbol": "INFY" } } }"#,
        ));
        assert_eq!(snap.order_books.len(), 1);
        assert!(snap.order_books.contains_key("INFY"));
        assert!(!snap.order_books.contains_key("RELIANCE"));
    }

    #[test]
    fn sparse_trade_event_parses() {
        let p = patch(r#"{ "recent_trade": { "id": "T1", "price": 100.0, "qty": 5 } }"#);
        let trade = p.recent_trade.unwrap();
        assert_eq!(trade.id, "T1");
        assert_eq!(trade.price, 100.0);
        assert_eq!(trade.qty, 5);
        assert_eq!(trade.symbol, "");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let p = patch(r#"{ "latency_us": 7, "order_book": { "symbol": "RELIANCE" } }"#);
        assert_eq!(p.latency_us, Some(7.0));
    }

    #[test]
    fn side_wire_format() {
        assert_eq!(serde_json::to_string(&Side::Buy).unwrap(), "\"BUY\"");
        assert_eq!(
            serde_json::from_str::<Side>("\"SELL\"").unwrap(),
            Side::Sell
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fixed-width OHLCV bar, timestamped at bar open (gateway convention).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Directional state derived from the fast-vs-slow EMA ordering.
/// Doubles as the trading signal value.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }

    /// Entry side for a signal in this direction.
    pub fn entry_side(&self) -> Side {
        match self {
            Direction::Long => Side::Buy,
            Direction::Short => Side::Sell,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display-only zone classification of the close relative to the EMA band.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Green,
    Yellow,
    Red,
    Gray,
}

/// Order side on the gateway wire (0 = Buy, 1 = Sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn value(&self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

/// Gateway order type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Limit,
    Market,
    Stop,
}

impl OrderType {
    pub fn value(&self) -> u8 {
        match self {
            OrderType::Limit => 1,
            OrderType::Market => 2,
            OrderType::Stop => 4,
        }
    }
}

/// Immutable indicator snapshot, built fresh on every query.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub symbol: String,
    pub contract_id: String,
    /// Timestamp of the current (latest closed) bar.
    pub as_of: DateTime<Utc>,
    pub close: f64,
    pub ema_fast: f64,
    /// Displayed slow EMA (smoothed when smoothing is enabled).
    pub ema_slow: f64,
    pub signal: Option<Direction>,
    pub color: Color,
    pub bar_count: usize,
}

/// Result of one bracket submission attempt.
///
/// Exit leg fields stay `None` when fill discovery times out: the parent
/// stands alone and no TP/SL is ever placed for it afterwards.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BracketOrder {
    pub parent_order_id: Option<i64>,
    pub fill_price: Option<f64>,
    pub tp_order_id: Option<i64>,
    pub tp_price: Option<f64>,
    pub sl_order_id: Option<i64>,
    pub sl_price: Option<f64>,
}

/// Kind of entry appended to the trade-event log.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum TradeEventKind {
    #[serde(rename = "DRY_RUN_SIGNAL")]
    DryRunSignal,
    #[serde(rename = "ORDER_SENT")]
    OrderSent,
    #[serde(rename = "ORDER_ERROR")]
    OrderError,
}

/// Audit record for every submission attempt, written as one NDJSON line.
#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub ts: DateTime<Utc>,
    pub event: TradeEventKind,
    pub symbol: String,
    pub contract_id: String,
    pub as_of: DateTime<Utc>,
    pub signal: Direction,
    pub qty: i64,
    pub tp_points: f64,
    pub sl_points: f64,
    pub account_id: i64,
    pub dry_run: bool,
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<BracketOrder>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_wire_values() {
        assert_eq!(Side::Buy.value(), 0);
        assert_eq!(Side::Sell.value(), 1);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn test_direction_entry_side() {
        assert_eq!(Direction::Long.entry_side(), Side::Buy);
        assert_eq!(Direction::Short.entry_side(), Side::Sell);
    }

    #[test]
    fn test_direction_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Direction::Long).unwrap(), "\"LONG\"");
        assert_eq!(serde_json::to_string(&Color::Yellow).unwrap(), "\"yellow\"");
    }

    #[test]
    fn test_trade_event_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&TradeEventKind::DryRunSignal).unwrap(),
            "\"DRY_RUN_SIGNAL\""
        );
        assert_eq!(
            serde_json::to_string(&TradeEventKind::OrderSent).unwrap(),
            "\"ORDER_SENT\""
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// OHLCV candlestick data. Immutable once the candle has closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Direction of an open position.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Order side that opens a position in this direction.
    pub fn entry_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in this direction.
    pub fn close_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }

    /// Stop-loss price for an entry at `entry_price`: below entry for longs,
    /// above entry for shorts.
    pub fn stop_loss_price(&self, entry_price: f64, stop_loss_pct: f64) -> f64 {
        match self {
            Side::Long => entry_price * (1.0 - stop_loss_pct),
            Side::Short => entry_price * (1.0 + stop_loss_pct),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Trading signal produced by the evaluator each cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Signal {
    EnterLong,
    EnterShort,
    Exit(ExitReason),
    Hold,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ExitReason {
    /// Z-score crossed back through the exit threshold.
    MeanReversion,
    /// Price breached the stop-loss level.
    StopLoss,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::MeanReversion => write!(f, "mean reversion"),
            ExitReason::StopLoss => write!(f, "stop loss"),
        }
    }
}

/// Indicator values derived from the current candle window.
///
/// Recomputed every cycle, never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub z_score: f64,
    pub adx: f64,
    /// Index of the candle the snapshot was computed at (last closed candle).
    pub computed_at: usize,
}

/// An open position. Created by a confirmed fill, mutated only by the
/// position tracker, destroyed on a confirmed exit fill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub side: Side,
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_loss: f64,
    pub opened_at: DateTime<Utc>,
    /// Exchange order id of the entry fill, if we placed it this process.
    pub order_id: Option<String>,
    /// Exchange order id of the resting protective stop, if one is live.
    pub protective_order_id: Option<String>,
}

impl Position {
    pub fn unrealized_pnl(&self, current_price: f64) -> f64 {
        match self.side {
            Side::Long => (current_price - self.entry_price) * self.quantity,
            Side::Short => (self.entry_price - current_price) * self.quantity,
        }
    }

    /// Whether `current_price` is at or beyond the stop-loss level.
    pub fn stop_breached(&self, current_price: f64) -> bool {
        match self.side {
            Side::Long => current_price <= self.stop_loss,
            Side::Short => current_price >= self.stop_loss,
        }
    }
}

/// One decision's worth of order. Constructed per cycle, submitted, then
/// discarded once it resolves into a position mutation or a logged failure.
#[derive(Debug, Clone)]
pub struct OrderIntent {
    pub side: Side,
    pub quantity: f64,
    pub reduce_only: bool,
    pub reason: String,
    /// Idempotency key submitted with the order so a retried submission of
    /// the same intent cannot fill twice.
    pub client_order_id: String,
}

impl OrderIntent {
    pub fn entry(side: Side, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            side,
            quantity,
            reduce_only: false,
            reason: reason.into(),
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn exit(side: Side, quantity: f64, reason: impl Into<String>) -> Self {
        Self {
            side,
            quantity,
            reduce_only: true,
            reason: reason.into(),
            client_order_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

// Exchange gateway module
//
// The trading core consumes the exchange as a capability trait with tagged
// errors; it never depends on catching arbitrary client errors. The Binance
// USDT-M futures implementation lives in `binance`.

pub mod binance;

pub use binance::BinanceFutures;

use async_trait::async_trait;

use crate::models::{Candle, OrderSide, Side};

/// Exchange failure taxonomy. The retry policy only ever retries variants
/// where `is_transient()` holds; everything else fails the cycle immediately.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExchangeError {
    #[error("rate limited")]
    RateLimited,
    #[error("insufficient margin")]
    InsufficientMargin,
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("exchange rejected request: {0}")]
    Rejected(String),
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::RateLimited | ExchangeError::Network(_))
    }
}

/// Market or protective stop order.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderType {
    Market,
    StopMarket { stop_price: f64 },
}

/// A concrete order to submit.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub order_type: OrderType,
    pub reduce_only: bool,
    /// Idempotency key forwarded to the exchange.
    pub client_order_id: Option<String>,
}

/// Exchange-reported order state.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderStatus {
    Pending,
    Filled { price: f64, quantity: f64 },
    Rejected,
    Canceled,
}

/// Position as the exchange reports it. Ground truth for reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub unrealized_pnl: f64,
}

/// A resting order on the exchange.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub order_id: String,
    pub side: OrderSide,
    pub is_stop: bool,
}

/// Quantity constraints for an instrument, fetched once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentLimits {
    pub quantity_step: f64,
    pub min_quantity: f64,
    pub max_quantity: Option<f64>,
    pub min_notional: f64,
}

impl InstrumentLimits {
    /// Floor `quantity` to the instrument's lot step.
    pub fn round_down(&self, quantity: f64) -> f64 {
        if self.quantity_step <= 0.0 {
            return quantity;
        }
        (quantity / self.quantity_step).floor() * self.quantity_step
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarginMode {
    Isolated,
    Cross,
}

/// Capability interface consumed by the execution core.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Last `limit` candles, oldest first. The final candle may still be
    /// forming; callers filter on close time.
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Free balance of `asset`.
    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError>;

    /// Open position for `symbol`, if any.
    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePosition>, ExchangeError>;

    /// Lot-size and notional limits for `symbol`.
    async fn get_instrument_limits(&self, symbol: &str) -> Result<InstrumentLimits, ExchangeError>;

    /// Idempotent; safe to call on every startup.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError>;

    /// Idempotent; safe to call on every startup.
    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError>;

    /// Submit an order; returns the exchange order id.
    async fn place_order(&self, order: &OrderRequest) -> Result<String, ExchangeError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError>;

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError>;

    /// All resting orders for `symbol` (used to sweep protective stops).
    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ExchangeError::RateLimited.is_transient());
        assert!(ExchangeError::Network("timeout".into()).is_transient());
        assert!(!ExchangeError::InsufficientMargin.is_transient());
        assert!(!ExchangeError::InvalidQuantity("lot".into()).is_transient());
        assert!(!ExchangeError::Rejected("bad".into()).is_transient());
    }

    #[test]
    fn test_round_down() {
        let limits = InstrumentLimits {
            quantity_step: 0.01,
            min_quantity: 0.01,
            max_quantity: None,
            min_notional: 5.0,
        };
        assert!((limits.round_down(8.3333) - 8.33).abs() < 1e-9);
        assert_eq!(limits.round_down(0.009), 0.0);
    }
}

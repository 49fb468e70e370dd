// Trading strategy module
pub mod mean_reversion;

pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};

use crate::models::{Candle, IndicatorSnapshot, Position, Signal};

/// Outcome of one signal evaluation, with enough context to replay the
/// decision from the logs.
#[derive(Debug, Clone)]
pub struct SignalDecision {
    pub signal: Signal,
    pub snapshot: Option<IndicatorSnapshot>,
    pub reason: String,
}

/// Base trait for trading strategies
pub trait Strategy: Send + Sync {
    /// Evaluate the decision table for this cycle. `position` is None when
    /// flat. Pure: no state is held between evaluations.
    fn evaluate(&self, candles: &[Candle], position: Option<&Position>) -> SignalDecision;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required before a signal can be produced
    fn min_candles_required(&self) -> usize;
}

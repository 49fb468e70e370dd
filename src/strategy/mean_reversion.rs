use crate::indicators::compute_snapshot;
use crate::models::{Candle, ExitReason, Position, Side, Signal};
use crate::strategy::{SignalDecision, Strategy};

/// Z-score mean reversion strategy
///
/// Fades statistical extremes in a ranging market and exits when price
/// reverts toward the mean.
///
/// Entry (flat only, and only while ADX says the market is range-bound):
/// - z <= -entry_threshold: price stretched far below the mean -> long
/// - z >= +entry_threshold: price stretched far above the mean -> short
///
/// Exit (checked in order; the stop-loss check wins when both fire in the
/// same cycle - declared policy, not an inference):
/// - price breaches the stop-loss level
/// - long: z >= exit_threshold; short: z <= exit_threshold
#[derive(Debug, Clone)]
pub struct MeanReversionStrategy {
    config: MeanReversionConfig,
}

#[derive(Debug, Clone)]
pub struct MeanReversionConfig {
    /// Rolling window for the Z-score mean and standard deviation
    pub z_score_window: usize,

    /// ADX period
    pub adx_window: usize,

    /// |z| at which to fade the move (e.g. 2.0)
    pub entry_threshold: f64,

    /// z at which a position is considered reverted (e.g. 0.5)
    pub exit_threshold: f64,

    /// Entries only when ADX is below this (range-bound market)
    pub adx_threshold: f64,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            z_score_window: 30,
            adx_window: 14,
            entry_threshold: 2.0,
            exit_threshold: 0.5,
            adx_threshold: 25.0,
        }
    }
}

impl MeanReversionStrategy {
    pub fn new(config: MeanReversionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MeanReversionConfig {
        &self.config
    }
}

impl Default for MeanReversionStrategy {
    fn default() -> Self {
        Self::new(MeanReversionConfig::default())
    }
}

impl Strategy for MeanReversionStrategy {
    fn evaluate(&self, candles: &[Candle], position: Option<&Position>) -> SignalDecision {
        let snapshot = compute_snapshot(candles, self.config.z_score_window, self.config.adx_window);

        let Some(snapshot) = snapshot else {
            return SignalDecision {
                signal: Signal::Hold,
                snapshot: None,
                reason: format!(
                    "insufficient data: {} candles, need {} with non-zero variance",
                    candles.len(),
                    self.min_candles_required()
                ),
            };
        };

        let current_price = candles[snapshot.computed_at].close;
        let z = snapshot.z_score;
        let adx = snapshot.adx;

        let (signal, reason) = match position {
            None => {
                if adx >= self.config.adx_threshold {
                    (
                        Signal::Hold,
                        format!("trending market: adx {adx:.1} >= {:.1}", self.config.adx_threshold),
                    )
                } else if z <= -self.config.entry_threshold {
                    (
                        Signal::EnterLong,
                        format!("z {z:.2} <= -{:.2}, adx {adx:.1}", self.config.entry_threshold),
                    )
                } else if z >= self.config.entry_threshold {
                    (
                        Signal::EnterShort,
                        format!("z {z:.2} >= {:.2}, adx {adx:.1}", self.config.entry_threshold),
                    )
                } else {
                    (Signal::Hold, format!("z {z:.2} inside entry band"))
                }
            }
            Some(position) => {
                // Stop-loss breach takes precedence over the z-score exit
                if position.stop_breached(current_price) {
                    (
                        Signal::Exit(ExitReason::StopLoss),
                        format!(
                            "price {current_price:.4} breached stop {:.4}",
                            position.stop_loss
                        ),
                    )
                } else {
                    let reverted = match position.side {
                        Side::Long => z >= self.config.exit_threshold,
                        Side::Short => z <= self.config.exit_threshold,
                    };
                    if reverted {
                        (
                            Signal::Exit(ExitReason::MeanReversion),
                            format!("z {z:.2} crossed exit threshold {:.2}", self.config.exit_threshold),
                        )
                    } else {
                        (Signal::Hold, format!("z {z:.2} still stretched"))
                    }
                }
            }
        };

        SignalDecision {
            signal,
            snapshot: Some(snapshot),
            reason,
        }
    }

    fn name(&self) -> &str {
        "Z-Score Mean Reversion"
    }

    fn min_candles_required(&self) -> usize {
        self.config.z_score_window.max(2 * self.config.adx_window + 1)
    }
}

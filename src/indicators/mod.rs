// Technical indicators module
// Implements the rolling Z-score and ADX used by the mean-reversion strategy

pub mod adx;
pub mod zscore;

pub use adx::calculate_adx;
pub use zscore::calculate_z_score;

use crate::models::{Candle, IndicatorSnapshot};

/// Compute the per-cycle indicator snapshot from the candle window.
///
/// Returns None if either indicator reports insufficient data (short window
/// or zero-variance closes); the evaluator treats that as HOLD.
pub fn compute_snapshot(
    candles: &[Candle],
    z_window: usize,
    adx_window: usize,
) -> Option<IndicatorSnapshot> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let z_score = calculate_z_score(&closes, z_window)?;
    let (adx, _, _) = calculate_adx(candles, adx_window)?;

    Some(IndicatorSnapshot {
        z_score,
        adx,
        computed_at: candles.len() - 1,
    })
}

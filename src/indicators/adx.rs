/// Average Directional Index (ADX) - measures trend strength
///
/// ADX ranges from 0 to 100:
/// - ADX > 25: trending market (bull or bear)
/// - ADX < 20: weak trend / choppy / ranging market
///
/// Low ADX is what a mean-reversion entry wants: range-bound conditions.
/// Also returns +DI and -DI for trend direction.
use crate::models::Candle;

/// Calculate ADX, +DI, and -DI over `period` candles using Wilder's
/// smoothing for TR, the directional movements, and the DX series itself.
///
/// Returns None with fewer than 2 * period + 1 candles: the first smoothed
/// DX needs a full period of DX values, each of which needs a full period
/// of true ranges.
pub fn calculate_adx(candles: &[Candle], period: usize) -> Option<(f64, f64, f64)> {
    if period == 0 || candles.len() < 2 * period + 1 {
        return None;
    }

    // True Range and Directional Movement series, one entry per candle pair
    let mut true_ranges = Vec::with_capacity(candles.len() - 1);
    let mut plus_dms = Vec::with_capacity(candles.len() - 1);
    let mut minus_dms = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (prev, curr) = (&pair[0], &pair[1]);

        let tr = (curr.high - curr.low)
            .max((curr.high - prev.close).abs())
            .max((curr.low - prev.close).abs());
        true_ranges.push(tr);

        let up_move = curr.high - prev.high;
        let down_move = prev.low - curr.low;

        plus_dms.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dms.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    // Wilder-smoothed running sums, seeded with the first `period` values
    let mut smoothed_tr: f64 = true_ranges[..period].iter().sum();
    let mut smoothed_plus: f64 = plus_dms[..period].iter().sum();
    let mut smoothed_minus: f64 = minus_dms[..period].iter().sum();

    let mut dx_values = Vec::with_capacity(true_ranges.len() - period + 1);
    let (mut plus_di, mut minus_di) = directional_indexes(smoothed_tr, smoothed_plus, smoothed_minus);
    dx_values.push(dx(plus_di, minus_di));

    for i in period..true_ranges.len() {
        smoothed_tr = smoothed_tr - smoothed_tr / period as f64 + true_ranges[i];
        smoothed_plus = smoothed_plus - smoothed_plus / period as f64 + plus_dms[i];
        smoothed_minus = smoothed_minus - smoothed_minus / period as f64 + minus_dms[i];

        let (p, m) = directional_indexes(smoothed_tr, smoothed_plus, smoothed_minus);
        plus_di = p;
        minus_di = m;
        dx_values.push(dx(plus_di, minus_di));
    }

    if dx_values.len() < period {
        return None;
    }

    // ADX: Wilder smoothing of the DX series
    let mut adx = dx_values[..period].iter().sum::<f64>() / period as f64;
    for value in &dx_values[period..] {
        adx = (adx * (period as f64 - 1.0) + value) / period as f64;
    }

    Some((adx, plus_di, minus_di))
}

fn directional_indexes(smoothed_tr: f64, smoothed_plus: f64, smoothed_minus: f64) -> (f64, f64) {
    if smoothed_tr > 0.0 {
        (
            smoothed_plus / smoothed_tr * 100.0,
            smoothed_minus / smoothed_tr * 100.0,
        )
    } else {
        (0.0, 0.0)
    }
}

fn dx(plus_di: f64, minus_di: f64) -> f64 {
    let di_sum = plus_di + minus_di;
    if di_sum > 0.0 {
        (plus_di - minus_di).abs() / di_sum * 100.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                open_time: Utc::now() + chrono::Duration::minutes(15 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    fn trending_up(n: usize) -> Vec<Candle> {
        let prices: Vec<(f64, f64, f64, f64)> = (0..n)
            .map(|i| {
                let base = 100.0 + 3.0 * i as f64;
                (base, base + 2.0, base - 1.0, base + 1.0)
            })
            .collect();
        create_test_candles(&prices)
    }

    fn choppy(n: usize) -> Vec<Candle> {
        let prices: Vec<(f64, f64, f64, f64)> = (0..n)
            .map(|i| {
                let close = if i % 2 == 0 { 100.0 } else { 99.0 };
                (100.0, 102.0, 98.0, close)
            })
            .collect();
        create_test_candles(&prices)
    }

    #[test]
    fn test_adx_insufficient_data() {
        assert!(calculate_adx(&trending_up(28), 14).is_none());
        assert!(calculate_adx(&[], 14).is_none());
    }

    #[test]
    fn test_adx_minimum_length() {
        assert!(calculate_adx(&trending_up(29), 14).is_some());
    }

    #[test]
    fn test_adx_strong_uptrend() {
        let (adx, plus_di, minus_di) = calculate_adx(&trending_up(40), 14).unwrap();
        assert!(plus_di > minus_di, "+DI should dominate in an uptrend");
        assert!(adx > 25.0, "expected strong trend, got ADX {adx:.2}");
    }

    #[test]
    fn test_adx_choppy_market() {
        let (adx, _, _) = calculate_adx(&choppy(40), 14).unwrap();
        assert!(adx < 20.0, "expected weak trend, got ADX {adx:.2}");
    }

    #[test]
    fn test_adx_deterministic() {
        let candles = trending_up(40);
        let first = calculate_adx(&candles, 14).unwrap();
        let second = calculate_adx(&candles, 14).unwrap();
        assert_eq!(first.0.to_bits(), second.0.to_bits());
        assert_eq!(first.1.to_bits(), second.1.to_bits());
        assert_eq!(first.2.to_bits(), second.2.to_bits());
    }

    #[test]
    fn test_adx_bounded() {
        for candles in [trending_up(60), choppy(60)] {
            let (adx, _, _) = calculate_adx(&candles, 14).unwrap();
            assert!((0.0..=100.0).contains(&adx));
        }
    }
}

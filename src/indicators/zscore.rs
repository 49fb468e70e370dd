/// Rolling Z-score: how many sample standard deviations the latest close
/// sits from the mean of the last `window` closes.
///
/// Returns None when fewer than `window` closes are available or the window
/// has zero variance (flat market) - callers treat both as "insufficient
/// data", never as a numeric result.
pub fn calculate_z_score(closes: &[f64], window: usize) -> Option<f64> {
    if window < 2 || closes.len() < window {
        return None;
    }

    let recent = &closes[closes.len() - window..];
    let mean = recent.iter().sum::<f64>() / window as f64;

    // Sample standard deviation (n - 1 divisor)
    let variance = recent
        .iter()
        .map(|close| (close - mean).powi(2))
        .sum::<f64>()
        / (window as f64 - 1.0);
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return None;
    }

    Some((recent[window - 1] - mean) / std_dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_returns_none() {
        let closes = vec![600.0; 29];
        assert!(calculate_z_score(&closes, 30).is_none());
        assert!(calculate_z_score(&[], 30).is_none());
    }

    #[test]
    fn test_zero_variance_returns_none() {
        let closes = vec![600.0; 30];
        assert!(calculate_z_score(&closes, 30).is_none());
    }

    #[test]
    fn test_extreme_dip_produces_large_negative_z() {
        // 29 closes at 600, latest at 550: far below the rolling mean
        let mut closes = vec![600.0; 29];
        closes.push(550.0);

        let z = calculate_z_score(&closes, 30).unwrap();
        assert!(z < -2.0, "expected deep negative z, got {z}");
    }

    #[test]
    fn test_sign_matches_direction() {
        let mut closes = vec![600.0; 29];
        closes.push(650.0);
        assert!(calculate_z_score(&closes, 30).unwrap() > 2.0);
    }

    #[test]
    fn test_known_value() {
        // mean = 2.0, sample std = 1.0, latest = 3.0 -> z = 1.0
        let closes = vec![1.0, 2.0, 3.0];
        let z = calculate_z_score(&closes, 3).unwrap();
        assert!((z - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_recomputation_is_bit_identical() {
        let closes: Vec<f64> = (0..40).map(|i| 600.0 + ((i * 37) % 11) as f64).collect();
        let first = calculate_z_score(&closes, 30).unwrap();
        let second = calculate_z_score(&closes, 30).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn test_uses_only_last_window_closes() {
        // A wild prefix outside the window must not affect the result
        let mut closes = vec![1_000_000.0, -42.0];
        closes.extend(vec![600.0; 29]);
        closes.push(550.0);

        let mut window_only = vec![600.0; 29];
        window_only.push(550.0);

        assert_eq!(
            calculate_z_score(&closes, 30),
            calculate_z_score(&window_only, 30)
        );
    }
}

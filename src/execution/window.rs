use std::collections::VecDeque;

use crate::models::Candle;

/// Rolling window of closed candles for one symbol.
///
/// Owned exclusively by the coordinator's single thread of control; merges
/// are deduplicated by open time so re-fetching an overlapping range is
/// harmless.
#[derive(Debug)]
pub struct CandleWindow {
    candles: VecDeque<Candle>,
    capacity: usize,
}

impl CandleWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Merge a fetched batch (oldest first) into the window.
    ///
    /// A candle with an open time already present replaces the stored one;
    /// strictly newer candles are appended; anything older than the window's
    /// first entry is ignored. Evicts from the front beyond capacity.
    pub fn merge(&mut self, batch: Vec<Candle>) {
        for candle in batch {
            match self.candles.back() {
                None => self.candles.push_back(candle),
                Some(last) if candle.open_time > last.open_time => {
                    self.candles.push_back(candle);
                }
                Some(_) => {
                    if let Some(existing) = self
                        .candles
                        .iter_mut()
                        .find(|c| c.open_time == candle.open_time)
                    {
                        *existing = candle;
                    }
                }
            }
        }
        while self.candles.len() > self.capacity {
            self.candles.pop_front();
        }
    }

    /// Contiguous view of the window, oldest first.
    pub fn as_slice(&mut self) -> &[Candle] {
        self.candles.make_contiguous();
        self.candles.as_slices().0
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.back().map(|c| c.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn candle(minute: i64, close: f64) -> Candle {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Candle {
            open_time: base + Duration::minutes(15 * minute),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_merge_appends_in_order() {
        let mut window = CandleWindow::new(10);
        window.merge(vec![candle(0, 100.0), candle(1, 101.0)]);
        window.merge(vec![candle(2, 102.0)]);

        assert_eq!(window.len(), 3);
        assert_eq!(window.last_close(), Some(102.0));
        assert_eq!(window.as_slice()[0].close, 100.0);
    }

    #[test]
    fn test_merge_deduplicates_by_open_time() {
        let mut window = CandleWindow::new(10);
        window.merge(vec![candle(0, 100.0), candle(1, 101.0)]);
        // Same open time, revised close: replaces, never duplicates
        window.merge(vec![candle(1, 105.0)]);

        assert_eq!(window.len(), 2);
        assert_eq!(window.last_close(), Some(105.0));
    }

    #[test]
    fn test_overlapping_fetch_is_harmless() {
        let mut window = CandleWindow::new(10);
        window.merge(vec![candle(0, 100.0), candle(1, 101.0), candle(2, 102.0)]);
        window.merge(vec![candle(1, 101.0), candle(2, 102.0), candle(3, 103.0)]);

        assert_eq!(window.len(), 4);
        assert_eq!(window.last_close(), Some(103.0));
    }

    #[test]
    fn test_evicts_oldest_beyond_capacity() {
        let mut window = CandleWindow::new(3);
        window.merge((0..5).map(|i| candle(i, 100.0 + i as f64)).collect());

        assert_eq!(window.len(), 3);
        assert_eq!(window.as_slice()[0].close, 102.0);
        assert_eq!(window.last_close(), Some(104.0));
    }
}

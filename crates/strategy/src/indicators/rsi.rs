use super::{Calculation, IndicatorError, Point};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// Returns `None` until at least `period + 1` closed price values are available.
#[derive(Debug, Clone)]
pub struct Rsi {
    pub period: usize,
}

impl Rsi {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period < 2 {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "RSI",
                min: 2,
                got: period,
            });
        }
        Ok(Self { period })
    }

    /// Compute RSI from a slice of close prices (oldest first).
    /// Returns `None` if there are fewer than `period + 1` values.
    pub fn compute_closes(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.period.saturating_add(1) {
            return None;
        }

        // First average gain/loss over the initial `period` changes
        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / self.period as f64;
        let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>()
            / self.period as f64;

        // Wilder smoothing over remaining changes
        for &change in &changes[self.period..] {
            let gain = if change > 0.0 { change } else { 0.0 };
            let loss = if change < 0.0 { change.abs() } else { 0.0 };
            avg_gain = (avg_gain * (self.period - 1) as f64 + gain) / self.period as f64;
            avg_loss = (avg_loss * (self.period - 1) as f64 + loss) / self.period as f64;
        }

        if avg_loss == 0.0 {
            return Some(100.0);
        }

        let rs = avg_gain / avg_loss;
        Some(100.0 - 100.0 / (1.0 + rs))
    }
}

impl Calculation for Rsi {
    fn label(&self) -> String {
        format!("RSI_{}", self.period)
    }

    fn min_window(&self) -> usize {
        self.period.saturating_add(1)
    }

    fn compute(&self, window: &[Point]) -> Option<f64> {
        let closes: Vec<f64> = window.iter().map(|p| p.close).collect();
        self.compute_closes(&closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_returns_none_when_insufficient_data() {
        let rsi = Rsi::new(14).unwrap();
        // Need at least period+1 = 15 values
        let prices = vec![100.0; 14];
        assert!(rsi.compute_closes(&prices).is_none());
    }

    #[test]
    fn rsi_returns_some_with_sufficient_data() {
        let rsi = Rsi::new(14).unwrap();
        // 15 values, exactly period+1
        let prices: Vec<f64> = (0..15).map(|i| 100.0 + i as f64).collect();
        assert!(rsi.compute_closes(&prices).is_some());
    }

    #[test]
    fn rsi_all_gains_returns_100() {
        let rsi = Rsi::new(3).unwrap();
        let prices = vec![10.0, 11.0, 12.0, 13.0, 14.0];
        let value = rsi.compute_closes(&prices).unwrap();
        assert!((value - 100.0).abs() < 1e-6, "Expected ~100, got {value}");
    }

    #[test]
    fn rsi_all_losses_returns_0() {
        let rsi = Rsi::new(3).unwrap();
        let prices = vec![14.0, 13.0, 12.0, 11.0, 10.0];
        let value = rsi.compute_closes(&prices).unwrap();
        assert!((value - 0.0).abs() < 1e-6, "Expected ~0, got {value}");
    }

    #[test]
    fn rsi_known_range() {
        let rsi = Rsi::new(14).unwrap();
        let prices = vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.15, 43.61, 44.33, 44.83, 45.10,
            45.15, 44.34, 44.09,
        ];
        let v = rsi.compute_closes(&prices).unwrap();
        assert!((0.0..=100.0).contains(&v), "RSI out of range: {v}");
    }

    #[test]
    fn rsi_window_matches_closes() {
        let rsi = Rsi::new(3).unwrap();
        let window: Vec<Point> = [10.0, 11.0, 10.5, 12.0]
            .iter()
            .map(|&c| Point::from_value(c, None))
            .collect();
        assert_eq!(rsi.compute(&window), rsi.compute_closes(&[10.0, 11.0, 10.5, 12.0]));
        assert_eq!(rsi.min_window(), 4);
    }

    #[test]
    fn rsi_period_below_two_rejected() {
        assert!(Rsi::new(1).is_err());
    }
}

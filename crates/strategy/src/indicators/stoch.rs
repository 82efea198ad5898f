use super::{Calculation, IndicatorError, Point};

/// Smoothed stochastic oscillator (%K).
///
/// Raw %K = 100 · (close − lowest low) / (highest high − lowest low) over
/// `period` bars, then averaged over the last `smoothing` raw values.
/// A flat range yields 50.
#[derive(Debug, Clone)]
pub struct Stoch {
    pub period: usize,
    pub smoothing: usize,
}

impl Stoch {
    pub fn new(period: usize, smoothing: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "STOCH",
                min: 1,
                got: period,
            });
        }
        if smoothing == 0 {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "STOCH smoothing",
                min: 1,
                got: smoothing,
            });
        }
        Ok(Self { period, smoothing })
    }

    fn raw_k(&self, bars: &[Point]) -> f64 {
        let highest = bars.iter().map(|p| p.high).fold(f64::MIN, f64::max);
        let lowest = bars.iter().map(|p| p.low).fold(f64::MAX, f64::min);
        let close = bars.last().map(|p| p.close).unwrap_or(lowest);
        let range = highest - lowest;
        if range <= f64::EPSILON {
            return 50.0;
        }
        100.0 * (close - lowest) / range
    }
}

impl Calculation for Stoch {
    fn label(&self) -> String {
        format!("STOCH_{}_{}", self.period, self.smoothing)
    }

    fn min_window(&self) -> usize {
        self.period.saturating_add(self.smoothing - 1)
    }

    fn compute(&self, window: &[Point]) -> Option<f64> {
        if window.len() < self.min_window() {
            return None;
        }
        let n = window.len();
        let sum: f64 = (0..self.smoothing)
            .map(|back| {
                let end = n - back;
                self.raw_k(&window[end - self.period..end])
            })
            .sum();
        Some(sum / self.smoothing as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Point {
        Point {
            open: close,
            high,
            low,
            close,
            volume: 1.0,
            timestamp: None,
        }
    }

    #[test]
    fn close_at_high_gives_100() {
        let stoch = Stoch::new(3, 1).unwrap();
        let window = vec![bar(10.0, 5.0, 6.0), bar(11.0, 6.0, 8.0), bar(12.0, 7.0, 12.0)];
        assert_eq!(stoch.compute(&window), Some(100.0));
    }

    #[test]
    fn smoothing_averages_raw_values() {
        let stoch = Stoch::new(2, 2).unwrap();
        // raw %K over [0..2] = 100 (close 10 at high 10), over [1..3] = 0 (close 5 at low 5)
        let window = vec![bar(8.0, 6.0, 7.0), bar(10.0, 6.0, 10.0), bar(10.0, 5.0, 5.0)];
        assert_eq!(stoch.compute(&window), Some(50.0));
    }

    #[test]
    fn flat_range_is_neutral() {
        let stoch = Stoch::new(2, 1).unwrap();
        let window = vec![bar(5.0, 5.0, 5.0), bar(5.0, 5.0, 5.0)];
        assert_eq!(stoch.compute(&window), Some(50.0));
    }

    #[test]
    fn short_window_is_none() {
        let stoch = Stoch::new(3, 2).unwrap();
        assert_eq!(stoch.min_window(), 4);
        assert!(stoch.compute(&[bar(1.0, 1.0, 1.0); 3]).is_none());
    }
}

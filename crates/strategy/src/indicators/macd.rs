use super::{Calculation, IndicatorError, Point};

/// MACD (Moving Average Convergence/Divergence) histogram.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period),
/// and outputs `MACD line − Signal` for the newest bar. A positive value means the
/// MACD line is above its signal line.
#[derive(Debug, Clone)]
pub struct Macd {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self, IndicatorError> {
        if fast == 0 || fast >= slow {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "MACD slow",
                min: fast.saturating_add(1),
                got: slow,
            });
        }
        if signal == 0 {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "MACD signal",
                min: 1,
                got: signal,
            });
        }
        Ok(Self { fast, slow, signal })
    }

    /// Histogram from a slice of close prices (oldest first).
    /// Returns `None` if there isn't enough data (needs `slow + signal` prices).
    pub fn compute_closes(&self, closes: &[f64]) -> Option<f64> {
        if closes.len() < self.slow.saturating_add(self.signal) {
            return None;
        }

        // Only the tail that can influence the newest signal value
        let tail = self.slow.saturating_add(self.signal.saturating_mul(3));
        let start = closes.len().saturating_sub(tail);
        let window = &closes[start..];

        let macd_line: Vec<f64> = (self.slow - 1..window.len())
            .map(|i| {
                let slice = &window[..=i];
                ema(slice, self.fast) - ema(slice, self.slow)
            })
            .collect();

        if macd_line.len() < self.signal {
            return None;
        }

        let curr_macd = *macd_line.last()?;
        let curr_sig = ema(&macd_line, self.signal);
        Some(curr_macd - curr_sig)
    }
}

impl Calculation for Macd {
    fn label(&self) -> String {
        format!("MACD_{}_{}_{}", self.fast, self.slow, self.signal)
    }

    fn min_window(&self) -> usize {
        self.slow.saturating_add(self.signal)
    }

    fn compute(&self, window: &[Point]) -> Option<f64> {
        let closes: Vec<f64> = window.iter().map(|p| p.close).collect();
        self.compute_closes(&closes)
    }
}

/// Exponential Moving Average of the last `period` values in `data`.
fn ema(data: &[f64], period: usize) -> f64 {
    if data.is_empty() || period == 0 {
        return 0.0;
    }
    let k = 2.0 / (period as f64 + 1.0);
    let start = data.len().saturating_sub(period.saturating_mul(3)); // enough history
    let slice = &data[start..];

    // Seed with SMA of first `period` values
    let seed_len = period.min(slice.len());
    let mut ema_val: f64 = slice[..seed_len].iter().sum::<f64>() / seed_len as f64;

    for &price in &slice[seed_len..] {
        ema_val = price * k + ema_val * (1.0 - k);
    }
    ema_val
}

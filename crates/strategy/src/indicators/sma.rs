use super::{Calculation, IndicatorError, Point};

/// Simple moving average of closes.
#[derive(Debug, Clone)]
pub struct Sma {
    pub period: usize,
}

impl Sma {
    pub fn new(period: usize) -> Result<Self, IndicatorError> {
        if period == 0 {
            return Err(IndicatorError::InvalidPeriod {
                indicator: "SMA",
                min: 1,
                got: period,
            });
        }
        Ok(Self { period })
    }
}

impl Calculation for Sma {
    fn label(&self) -> String {
        format!("SMA_{}", self.period)
    }

    fn min_window(&self) -> usize {
        self.period
    }

    fn compute(&self, window: &[Point]) -> Option<f64> {
        if window.len() < self.period {
            return None;
        }
        let tail = &window[window.len() - self.period..];
        Some(tail.iter().map(|p| p.close).sum::<f64>() / self.period as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(closes: &[f64]) -> Vec<Point> {
        closes.iter().map(|&c| Point::from_value(c, None)).collect()
    }

    #[test]
    fn sma_uses_latest_period_closes() {
        let sma = Sma::new(3).unwrap();
        assert_eq!(sma.compute(&points(&[1.0, 2.0, 3.0, 4.0])), Some(3.0));
    }

    #[test]
    fn sma_none_when_short() {
        let sma = Sma::new(3).unwrap();
        assert!(sma.compute(&points(&[1.0, 2.0])).is_none());
    }

    #[test]
    fn zero_period_rejected() {
        assert!(Sma::new(0).is_err());
    }
}

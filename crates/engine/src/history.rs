use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Months, Utc};
use tracing::{info, warn};

use common::{AssetClass, Bar, Error, MarketDataSource, Resolution, Result, Symbol};

/// How far the request window end moves back before the retry.
const RETRY_END_SHIFT_MINUTES: i64 = 15;

/// Start of a history window that holds at least `length` bars ending at `end`.
///
/// Day bars look back whole years, minute bars whole days, using the asset
/// class's trading calendar.
pub fn lookback_start(
    end: DateTime<Utc>,
    length: usize,
    resolution: Resolution,
    asset_class: AssetClass,
) -> Result<DateTime<Utc>> {
    let length = length as f64;
    let start = match resolution {
        Resolution::Day => {
            let years = (length / asset_class.trading_days_per_year()).ceil().max(1.0) as u32;
            end.checked_sub_months(Months::new(12 * years))
        }
        Resolution::Minute => {
            let days = (length / asset_class.trading_minutes_per_day()).ceil().max(1.0) as i64;
            end.checked_sub_signed(chrono::Duration::days(days))
        }
    };
    start.ok_or_else(|| Error::Data(format!("history window of {length} {resolution} bars is out of range")))
}

/// Fetch warmup history for `symbols`, retrying exactly once.
///
/// The retry waits `retry_delay` and moves the window end 15 minutes into the
/// past. A second failure is returned to the caller.
pub async fn fetch_with_retry(
    source: &dyn MarketDataSource,
    symbols: &[Symbol],
    length: usize,
    resolution: Resolution,
    asset_class: AssetClass,
    end: DateTime<Utc>,
    retry_delay: Duration,
) -> Result<HashMap<Symbol, Vec<Bar>>> {
    let start = lookback_start(end, length, resolution, asset_class)?;
    info!(symbols = symbols.len(), length, %resolution, %start, %end, "Fetching warmup history");

    match source.fetch_bars(symbols, start, end, resolution).await {
        Ok(data) => Ok(data),
        Err(e) => {
            warn!(error = %e, delay = ?retry_delay, "History fetch failed, retrying once");
            tokio::time::sleep(retry_delay).await;
            let end = end - chrono::Duration::minutes(RETRY_END_SHIFT_MINUTES);
            let start = lookback_start(end, length, resolution, asset_class)?;
            source.fetch_bars(symbols, start, end, resolution).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    struct FlakySource {
        failures: usize,
        calls: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
    }

    impl FlakySource {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl MarketDataSource for FlakySource {
        async fn fetch_bars(
            &self,
            symbols: &[Symbol],
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            _resolution: Resolution,
        ) -> Result<HashMap<Symbol, Vec<Bar>>> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((start, end));
            if calls.len() <= self.failures {
                return Err(Error::Http("connection reset".into()));
            }
            Ok(symbols.iter().map(|s| (s.clone(), Vec::new())).collect())
        }
    }

    fn end() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn day_window_spans_whole_years() {
        let start = lookback_start(end(), 200, Resolution::Day, AssetClass::Equity).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 3, 10, 12, 0, 0).unwrap());

        let start = lookback_start(end(), 300, Resolution::Day, AssetClass::Equity).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2022, 3, 10, 12, 0, 0).unwrap());

        let start = lookback_start(end(), 300, Resolution::Day, AssetClass::Crypto).unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2023, 3, 10, 12, 0, 0).unwrap());
    }

    #[test]
    fn minute_window_spans_whole_days() {
        let start = lookback_start(end(), 500, Resolution::Minute, AssetClass::Equity).unwrap();
        assert_eq!(start, end() - chrono::Duration::days(2));

        let start = lookback_start(end(), 500, Resolution::Minute, AssetClass::Crypto).unwrap();
        assert_eq!(start, end() - chrono::Duration::days(1));
    }

    #[test]
    fn zero_length_still_looks_back() {
        let start = lookback_start(end(), 0, Resolution::Day, AssetClass::Crypto).unwrap();
        assert!(start < end());
    }

    #[tokio::test]
    async fn one_failure_then_success_takes_two_attempts() {
        let source = FlakySource::new(1);
        let symbols = vec![Symbol::from("BTCUSDT")];
        let data = fetch_with_retry(
            &source,
            &symbols,
            30,
            Resolution::Day,
            AssetClass::Crypto,
            end(),
            Duration::ZERO,
        )
        .await
        .unwrap();

        assert!(data.contains_key("BTCUSDT"));
        let calls = source.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, end());
        assert_eq!(calls[1].1, end() - chrono::Duration::minutes(15));
    }

    #[tokio::test]
    async fn two_failures_return_the_error() {
        let source = FlakySource::new(2);
        let result = fetch_with_retry(
            &source,
            &[Symbol::from("BTCUSDT")],
            30,
            Resolution::Day,
            AssetClass::Crypto,
            end(),
            Duration::ZERO,
        )
        .await;

        assert!(matches!(result, Err(Error::Http(_))));
        assert_eq!(source.calls.lock().unwrap().len(), 2);
    }
}

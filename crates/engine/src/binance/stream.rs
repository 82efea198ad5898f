use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};
use url::Url;

use common::{Bar, Error, Resolution, Result, Symbol};

const STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

/// Binance kline WebSocket stream for a single symbol.
///
/// Subscribes to the combined kline stream for every requested resolution,
/// turns closed klines into [`Bar`]s and publishes them on a broadcast
/// channel. Reconnects automatically with exponential backoff.
pub struct BinanceStream {
    symbol: Symbol,
    resolutions: Vec<Resolution>,
    bar_tx: broadcast::Sender<Bar>,
}

impl BinanceStream {
    pub fn new(
        symbol: impl Into<Symbol>,
        resolutions: Vec<Resolution>,
        bar_tx: broadcast::Sender<Bar>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            resolutions,
            bar_tx,
        }
    }

    /// Run the stream loop forever, reconnecting on failure.
    /// Call this inside a `tokio::spawn`.
    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        const MAX_BACKOFF: Duration = Duration::from_secs(60);

        loop {
            info!(symbol = %self.symbol, "Connecting to Binance kline stream");
            match self.connect_once().await {
                Ok(()) => {
                    info!(symbol = %self.symbol, "Kline stream closed cleanly");
                    // Binance ends sessions after 24h
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    backoff = Duration::from_secs(1);
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, error = %e, backoff = ?backoff, "Kline stream error, reconnecting");
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    fn url(&self) -> Result<Url> {
        let lower = self.symbol.as_str().to_lowercase();
        let streams = self
            .resolutions
            .iter()
            .map(|r| format!("{lower}@kline_{}", r.interval()))
            .collect::<Vec<_>>()
            .join("/");
        Url::parse(&format!("{STREAM_URL}?streams={streams}"))
            .map_err(|e| Error::WebSocket(e.to_string()))
    }

    async fn connect_once(&self) -> Result<()> {
        let (ws_stream, _) = connect_async(self.url()?)
            .await
            .map_err(|e| Error::WebSocket(e.to_string()))?;

        let (_, mut read) = ws_stream.split();

        while let Some(msg) = read.next().await {
            let msg = msg.map_err(|e| Error::WebSocket(e.to_string()))?;

            if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
                match parse_kline_event(&text) {
                    Ok(Some(bar)) => {
                        debug!(symbol = %bar.symbol, resolution = %bar.resolution, close = bar.close, "Closed kline");
                        // No receivers is fine
                        let _ = self.bar_tx.send(bar);
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(symbol = %self.symbol, error = %e, "Failed to parse kline event");
                    }
                }
            }
        }

        Ok(())
    }
}

// ─── Binance kline JSON parsing ──────────────────────────────────────────────

#[derive(Deserialize)]
struct KlineEvent {
    #[serde(rename = "s")]
    symbol: String,
    k: KlineData,
}

#[derive(Deserialize)]
struct KlineData {
    #[serde(rename = "t")]
    open_time_ms: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

fn price(field: &str, raw: &str) -> Result<f64> {
    raw.parse()
        .map_err(|_| Error::Data(format!("kline field '{field}' is not a number: {raw}")))
}

/// Parse a combined-stream message. Returns `None` for anything that is not
/// a closed kline at a known resolution.
fn parse_kline_event(text: &str) -> Result<Option<Bar>> {
    let mut value: serde_json::Value = serde_json::from_str(text)?;
    // Combined streams wrap the payload as {"stream": ..., "data": {...}}
    if let Some(data) = value.get_mut("data").map(serde_json::Value::take) {
        value = data;
    }
    if value.get("e").and_then(|v| v.as_str()) != Some("kline") {
        return Ok(None);
    }

    let event: KlineEvent = serde_json::from_value(value)?;
    let k = event.k;
    if !k.is_closed {
        return Ok(None);
    }
    let Some(resolution) = Resolution::from_interval(&k.interval) else {
        return Ok(None);
    };

    let timestamp: DateTime<Utc> = Utc
        .timestamp_millis_opt(k.open_time_ms)
        .single()
        .ok_or_else(|| Error::Data(format!("kline open time out of range: {}", k.open_time_ms)))?;

    Ok(Some(Bar {
        symbol: Symbol::from(event.symbol),
        resolution,
        open: price("o", &k.open)?,
        high: price("h", &k.high)?,
        low: price("l", &k.low)?,
        close: price("c", &k.close)?,
        volume: price("v", &k.volume)?,
        timestamp,
    }))
}

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use common::{
    Bar, Error, ExchangeClient, Fill, MarketDataSource, Order, OrderSide, Position, Resolution,
    Result, Symbol, TradingMode,
};

const BASE_URL: &str = "https://api.binance.com";
const QUOTE_ASSET: &str = "USDT";
/// Maximum klines Binance returns per request.
const KLINE_LIMIT: usize = 1000;

/// REST API client for Binance. Used for order placement, account queries
/// and historical klines.
pub struct BinanceClient {
    api_key: String,
    secret: String,
    base_url: String,
    http: Client,
}

impl BinanceClient {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: BASE_URL.to_string(),
            http,
        })
    }

    /// Client without credentials, good for market data only.
    pub fn public() -> Result<Self> {
        Self::new("", "")
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn timestamp_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn sign(&self, query: &str) -> Result<String> {
        type HmacSha256 = Hmac<Sha256>;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| Error::Config(format!("invalid signing key: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    async fn public_get(&self, path: &str, params: &str) -> Result<String> {
        let url = if params.is_empty() {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}{path}?{params}", self.base_url)
        };
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_get(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = if params.is_empty() {
            format!("timestamp={ts}")
        } else {
            format!("{params}&timestamp={ts}")
        };
        let signature = self.sign(&query)?;
        let url = format!("{}{path}?{query}&signature={signature}", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }

    async fn signed_post(&self, path: &str, params: &str) -> Result<String> {
        let ts = Self::timestamp_ms();
        let query = format!("{params}&timestamp={ts}");
        let signature = self.sign(&query)?;
        let body = format!("{query}&signature={signature}");
        let url = format!("{}{path}", self.base_url);

        let resp = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Exchange(format!("HTTP {status}: {text}")));
        }
        Ok(text)
    }

    async fn account(&self) -> Result<AccountResponse> {
        let body = self.signed_get("/api/v3/account", "").await?;
        serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))
    }

    async fn all_prices(&self) -> Result<HashMap<String, f64>> {
        let body = self.public_get("/api/v3/ticker/price", "").await?;
        let tickers: Vec<SymbolTicker> =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;
        Ok(tickers
            .into_iter()
            .filter_map(|t| t.price.parse::<f64>().ok().map(|p| (t.symbol, p)))
            .collect())
    }

    async fn fetch_symbol_bars(
        &self,
        symbol: &Symbol,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<Vec<Bar>> {
        let end_ms = end.timestamp_millis();
        let mut cursor = start.timestamp_millis();
        let mut bars: Vec<Bar> = Vec::new();

        while cursor <= end_ms {
            let params = format!(
                "symbol={symbol}&interval={}&startTime={cursor}&endTime={end_ms}&limit={KLINE_LIMIT}",
                resolution.interval()
            );
            let body = self.public_get("/api/v3/klines", &params).await?;
            let page = parse_klines(symbol, resolution, &body)?;
            let Some(last) = page.last() else { break };

            cursor = last.timestamp.timestamp_millis() + 1;
            let full_page = page.len() == KLINE_LIMIT;
            bars.extend(page);
            if !full_page {
                break;
            }
        }

        debug!(symbol = %symbol, resolution = %resolution, bars = bars.len(), "Fetched historical klines");
        Ok(bars)
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn submit_order(&self, order: &Order) -> Result<Fill> {
        let side = order.side.to_string();
        let order_type = if order.price.is_some() {
            "LIMIT"
        } else {
            "MARKET"
        };

        let mut params = format!(
            "symbol={}&side={}&type={}&quantity={}&newClientOrderId={}",
            order.symbol, side, order_type, order.quantity, order.id
        );
        if let Some(price) = order.price {
            params.push_str(&format!("&price={price}&timeInForce=GTC"));
        }

        debug!(symbol = %order.symbol, side = %side, "Submitting order to Binance");
        let body = self.signed_post("/api/v3/order", &params).await?;

        let resp: OrderResponse =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;

        let fill_price = resp
            .fills
            .first()
            .and_then(|f| f.price.parse::<f64>().ok())
            .unwrap_or_else(|| order.price.unwrap_or(0.0));

        Ok(Fill {
            order_id: resp.client_order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            fill_price,
            quantity: order.quantity,
            timestamp: Utc::now(),
        })
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        // Spot balances as long pseudo-positions; entry price is unknown
        // without trade history.
        let account = self.account().await?;

        let positions = account
            .balances
            .into_iter()
            .filter(|b| b.asset != QUOTE_ASSET && b.asset != "BNB")
            .filter_map(|b| {
                let qty = b.total();
                (qty > 0.0).then(|| Position {
                    id: uuid::Uuid::new_v4().to_string(),
                    symbol: Symbol::new(format!("{}{QUOTE_ASSET}", b.asset)),
                    side: OrderSide::Buy,
                    entry_price: 0.0,
                    quantity: qty,
                    mode: TradingMode::Live,
                    opened_at: Utc::now(),
                })
            })
            .collect();

        Ok(positions)
    }

    async fn current_price(&self, symbol: &Symbol) -> Result<f64> {
        let body = self
            .public_get("/api/v3/ticker/price", &format!("symbol={symbol}"))
            .await?;
        let ticker: SymbolTicker =
            serde_json::from_str(&body).map_err(|e| Error::Exchange(e.to_string()))?;

        ticker
            .price
            .parse::<f64>()
            .map_err(|e| Error::Exchange(e.to_string()))
    }

    async fn equity(&self) -> Result<f64> {
        let account = self.account().await?;
        let prices = self.all_prices().await?;

        let mut equity = 0.0;
        for balance in &account.balances {
            let qty = balance.total();
            if qty <= 0.0 {
                continue;
            }
            if balance.asset == QUOTE_ASSET {
                equity += qty;
                continue;
            }
            match prices.get(&format!("{}{QUOTE_ASSET}", balance.asset)) {
                Some(price) => equity += qty * price,
                None => warn!(asset = %balance.asset, "No quote price, balance left out of equity"),
            }
        }
        Ok(equity)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn fetch_bars(
        &self,
        symbols: &[Symbol],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        resolution: Resolution,
    ) -> Result<HashMap<Symbol, Vec<Bar>>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for symbol in symbols {
            let bars = self.fetch_symbol_bars(symbol, start, end, resolution).await?;
            if !bars.is_empty() {
                out.insert(symbol.clone(), bars);
            }
        }
        Ok(out)
    }
}

/// Parse a `/api/v3/klines` response body. Each kline is a JSON array:
/// `[openTime, open, high, low, close, volume, closeTime, ...]` with prices
/// encoded as strings.
fn parse_klines(symbol: &Symbol, resolution: Resolution, body: &str) -> Result<Vec<Bar>> {
    let rows: Vec<Vec<serde_json::Value>> = serde_json::from_str(body)?;
    rows.iter()
        .map(|row| {
            let open_time = row
                .first()
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| Error::Data(format!("kline for {symbol} has no open time")))?;
            let timestamp = Utc
                .timestamp_millis_opt(open_time)
                .single()
                .ok_or_else(|| Error::Data(format!("kline open time out of range: {open_time}")))?;
            let field = |idx: usize| -> Result<f64> {
                row.get(idx)
                    .and_then(serde_json::Value::as_str)
                    .and_then(|s| s.parse::<f64>().ok())
                    .ok_or_else(|| Error::Data(format!("kline for {symbol} has bad field {idx}")))
            };
            Ok(Bar {
                symbol: symbol.clone(),
                resolution,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
                timestamp,
            })
        })
        .collect()
}

// ─── Response types ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    client_order_id: String,
    #[serde(default)]
    fills: Vec<FillDetail>,
}

#[derive(Deserialize)]
struct FillDetail {
    price: String,
}

#[derive(Deserialize)]
struct AccountResponse {
    balances: Vec<Balance>,
}

#[derive(Deserialize)]
struct Balance {
    asset: String,
    free: String,
    locked: String,
}

impl Balance {
    fn total(&self) -> f64 {
        self.free.parse::<f64>().unwrap_or(0.0) + self.locked.parse::<f64>().unwrap_or(0.0)
    }
}

#[derive(Deserialize)]
struct SymbolTicker {
    symbol: String,
    price: String,
}

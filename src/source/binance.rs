use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::error::SourceError;
use crate::model::{Candle, Quote, SourceKind};
use crate::source::PriceSource;

const BINANCE_BASE_URL: &str = "https://api.binance.com";
const MAX_CANDLES_PER_REQUEST: usize = 1000;

pub struct BinanceSource {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl BinanceSource {
    pub fn new() -> Self {
        // Kline endpoint costs weight 2 against ~6000 weight/min; 20 req/s leaves headroom.
        let quota = Quota::per_second(nonzero!(20u32));
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Report<SourceError>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{BINANCE_BASE_URL}{path}");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .change_context(SourceError::Request {
                source_name: "binance".into(),
            })?;

        if !response.status().is_success() {
            return Err(Report::new(SourceError::Request {
                source_name: "binance".into(),
            })
            .attach(format!("HTTP status: {}", response.status())));
        }

        response.json().await.change_context(SourceError::ResponseParse {
            source_name: "binance".into(),
        })
    }
}

impl Default for BinanceSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceSource for BinanceSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Binance
    }

    fn fetch_quote(&self, symbol: &str) -> BoxFuture<'_, Result<Quote, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let raw: BinanceTickerPrice = self
                .get_json("/api/v3/ticker/price", &[("symbol", symbol.as_str())])
                .await?;
            raw.into_quote()
        })
    }

    fn fetch_daily_candles(
        &self,
        symbol: &str,
        days: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let limit = days.min(MAX_CANDLES_PER_REQUEST).to_string();
            let params = [
                ("symbol", symbol.as_str()),
                ("interval", "1d"),
                ("limit", limit.as_str()),
            ];

            let raw: Vec<BinanceKlineRow> = self.get_json("/api/v3/klines", &params).await?;

            debug!(
                symbol = %symbol,
                fetched = raw.len(),
                "binance candle fetch complete"
            );

            raw.into_iter()
                .map(BinanceKlineRow::into_candle)
                .collect::<Result<Vec<_>, _>>()
        })
    }
}

fn parse_decimal_str(s: &str) -> Result<Decimal, Report<SourceError>> {
    Decimal::from_str(s)
        .change_context(SourceError::ResponseParse {
            source_name: "binance".into(),
        })
        .attach_with(|| format!("value: {s}"))
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct BinanceTickerPrice {
    symbol: String,
    price: String,
}

impl BinanceTickerPrice {
    fn into_quote(self) -> Result<Quote, Report<SourceError>> {
        Ok(Quote {
            source: SourceKind::Binance,
            price: parse_decimal_str(&self.price)?,
            symbol: self.symbol,
            timestamp: Utc::now(),
        })
    }
}

/// Kline row: `[open_time, open, high, low, close, volume, close_time, ...]`
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct BinanceKlineRow(
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    String, // quote asset volume
    u64,    // number of trades
    String, // taker buy base volume
    String, // taker buy quote volume
    String, // ignore
);

impl BinanceKlineRow {
    fn into_candle(self) -> Result<Candle, Report<SourceError>> {
        let open_time = DateTime::from_timestamp_millis(self.0).ok_or_else(|| {
            Report::new(SourceError::ResponseParse {
                source_name: "binance".into(),
            })
            .attach(format!("open time: {}", self.0))
        })?;

        Ok(Candle {
            date: open_time.date_naive(),
            high: parse_decimal_str(&self.2)?,
            close: parse_decimal_str(&self.4)?,
        })
    }
}

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
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

const UPBIT_BASE_URL: &str = "https://api.upbit.com";
const MAX_CANDLES_PER_REQUEST: usize = 200;
const UPBIT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub struct UpbitSource {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl UpbitSource {
    pub fn new() -> Self {
        // Upbit allows 10 req/s; use 8 for safety margin
        let quota = Quota::per_second(nonzero!(8u32));
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
    ) -> Result<T, Report<SourceError>> {
        self.rate_limiter.until_ready().await;

        let url = format!("{UPBIT_BASE_URL}{path}");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .change_context(request_error())?;

        if !response.status().is_success() {
            return Err(Report::new(request_error())
                .attach(format!("HTTP status: {}", response.status())));
        }

        response.json().await.change_context(SourceError::ResponseParse {
            source_name: "upbit".into(),
        })
    }

    async fn fetch_candles_page(
        &self,
        symbol: &str,
        count: usize,
        to: Option<&str>,
    ) -> Result<Vec<UpbitDayCandle>, Report<SourceError>> {
        let mut params = vec![
            ("market".to_owned(), symbol.to_owned()),
            ("count".to_owned(), count.to_string()),
        ];
        if let Some(to) = to {
            params.push(("to".to_owned(), to.to_owned()));
        }
        self.get_json("/v1/candles/days", &params).await
    }
}

impl Default for UpbitSource {
    fn default() -> Self {
        Self::new()
    }
}

fn request_error() -> SourceError {
    SourceError::Request {
        source_name: "upbit".into(),
    }
}

impl PriceSource for UpbitSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Upbit
    }

    fn fetch_quote(&self, symbol: &str) -> BoxFuture<'_, Result<Quote, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let params = [("markets".to_owned(), symbol.clone())];
            let tickers: Vec<UpbitTicker> = self.get_json("/v1/ticker", &params).await?;

            tickers
                .into_iter()
                .find(|t| t.market == symbol)
                .map(UpbitTicker::into_quote)
                .ok_or_else(|| {
                    Report::new(SourceError::EmptyResponse {
                        source_name: "upbit".into(),
                        symbol: symbol.clone(),
                    })
                })
        })
    }

    fn fetch_daily_candles(
        &self,
        symbol: &str,
        days: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let mut all_candles: Vec<Candle> = Vec::with_capacity(days);
            let mut to: Option<String> = None;
            let mut remaining = days;

            while remaining > 0 {
                let count = remaining.min(MAX_CANDLES_PER_REQUEST);
                let page = self.fetch_candles_page(&symbol, count, to.as_deref()).await?;

                if page.is_empty() {
                    break;
                }

                let fetched = page.len();
                to = page.last().map(|c| c.candle_date_time_utc.clone());

                for raw in page {
                    all_candles.push(raw.into_candle()?);
                }

                remaining = remaining.saturating_sub(fetched);
                if fetched < count {
                    break;
                }

                debug!(
                    symbol = %symbol,
                    fetched = all_candles.len(),
                    total = days,
                    "upbit candle fetch progress"
                );
            }

            // Upbit returns newest-first; reverse to oldest-first
            all_candles.reverse();
            Ok(all_candles)
        })
    }
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UpbitTicker {
    market: String,
    trade_price: Decimal,
    timestamp: i64,
}

impl UpbitTicker {
    fn into_quote(self) -> Quote {
        let timestamp = DateTime::from_timestamp_millis(self.timestamp).unwrap_or_else(Utc::now);
        Quote {
            source: SourceKind::Upbit,
            symbol: self.market,
            price: self.trade_price,
            timestamp,
        }
    }
}

#[derive(Debug, Deserialize)]
struct UpbitDayCandle {
    candle_date_time_utc: String,
    high_price: Decimal,
    trade_price: Decimal,
}

impl UpbitDayCandle {
    fn into_candle(self) -> Result<Candle, Report<SourceError>> {
        let date = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, UPBIT_TIME_FORMAT)
            .change_context(SourceError::ResponseParse {
                source_name: "upbit".into(),
            })
            .attach_with(|| format!("candle_date_time_utc: {}", self.candle_date_time_utc))?
            .date();

        Ok(Candle {
            date,
            high: self.high_price,
            close: self.trade_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn upbit_day_candle_parses_into_candle() {
        let raw = UpbitDayCandle {
            candle_date_time_utc: "2024-01-01T00:00:00".to_owned(),
            high_price: dec!(51000),
            trade_price: dec!(50500),
        };
        let candle = raw.into_candle().unwrap();
        assert_eq!(candle.date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(candle.high, dec!(51000));
        assert_eq!(candle.close, dec!(50500));
    }

    #[test]
    fn upbit_day_candle_rejects_bad_timestamp() {
        let raw = UpbitDayCandle {
            candle_date_time_utc: "yesterday".to_owned(),
            high_price: dec!(1),
            trade_price: dec!(1),
        };
        assert!(raw.into_candle().is_err());
    }

    #[test]
    fn upbit_ticker_json_parses_into_quote() {
        let json = r#"[{"market":"KRW-BTC","trade_price":120500000.0,"timestamp":1704067200000,"change":"RISE"}]"#;
        let tickers: Vec<UpbitTicker> = serde_json::from_str(json).unwrap();
        let quote = tickers.into_iter().next().unwrap().into_quote();
        assert_eq!(quote.source, SourceKind::Upbit);
        assert_eq!(quote.symbol, "KRW-BTC");
        assert_eq!(quote.price, dec!(120500000));
        assert_eq!(quote.timestamp.timestamp_millis(), 1704067200000);
    }

    #[test]
    fn upbit_fractional_json_number_parses_exactly() {
        let json = r#"{"candle_date_time_utc":"2024-01-01T00:00:00","high_price":6.6,"trade_price":5.61}"#;
        let candle = serde_json::from_str::<UpbitDayCandle>(json)
            .unwrap()
            .into_candle()
            .unwrap();
        assert_eq!(candle.high, dec!(6.6));
        assert_eq!(candle.close, dec!(5.61));
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_quote() {
        let source = UpbitSource::new();
        let quote = source.fetch_quote("KRW-BTC").await.unwrap();
        assert!(quote.price > Decimal::ZERO);
    }

    /// Integration test: requires network access. Run with `cargo test -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn integration_fetch_daily_candles() {
        let source = UpbitSource::new();
        let candles = source.fetch_daily_candles("KRW-BTC", 250).await.unwrap();
        assert!(!candles.is_empty());
        assert!(candles.len() <= 250);
        assert!(candles.windows(2).all(|w| w[0].date <= w[1].date));
    }
}

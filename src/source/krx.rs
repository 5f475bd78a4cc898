use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, TimeDelta, Utc};
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

/// KRX listings (e.g. `005930`) priced through Naver Finance.
const QUOTE_BASE_URL: &str = "https://m.stock.naver.com/api/stock";
const CHART_BASE_URL: &str = "https://api.stock.naver.com/chart/domestic/item";
const CHART_DATE_FORMAT: &str = "%Y%m%d";
const KST_OFFSET_HOURS: i64 = 9;

pub struct KrxSource {
    client: reqwest::Client,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl KrxSource {
    pub fn new() -> Self {
        // No published limit; stay well under what a browser session does
        let quota = Quota::per_second(nonzero!(5u32));
        Self {
            client: reqwest::Client::new(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, Report<SourceError>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .change_context(request_error())?;

        if !response.status().is_success() {
            return Err(Report::new(request_error())
                .attach(format!("HTTP status: {}", response.status())));
        }

        response.json().await.change_context(parse_error())
    }
}

impl Default for KrxSource {
    fn default() -> Self {
        Self::new()
    }
}

fn request_error() -> SourceError {
    SourceError::Request {
        source_name: "krx".into(),
    }
}

fn parse_error() -> SourceError {
    SourceError::ResponseParse {
        source_name: "krx".into(),
    }
}

/// Today's trading date in Seoul.
fn seoul_today() -> NaiveDate {
    (Utc::now() + TimeDelta::hours(KST_OFFSET_HOURS)).date_naive()
}

/// Chart query bounds covering the `days` calendar days up to `today`.
fn chart_window(today: NaiveDate, days: usize) -> (String, String) {
    let start = today
        .checked_sub_days(Days::new(days as u64))
        .unwrap_or(NaiveDate::MIN);
    (
        format!("{}0000", start.format(CHART_DATE_FORMAT)),
        format!("{}2359", today.format(CHART_DATE_FORMAT)),
    )
}

impl PriceSource for KrxSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Krx
    }

    fn fetch_quote(&self, symbol: &str) -> BoxFuture<'_, Result<Quote, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let url = format!("{QUOTE_BASE_URL}/{symbol}/basic");
            let raw: KrxBasic = self.get_json(&url, &[]).await?;
            raw.into_quote()
        })
    }

    /// Exchange holidays and weekends leave gaps, so the window holds the bars
    /// of the last `days` calendar days rather than `days` bars.
    fn fetch_daily_candles(
        &self,
        symbol: &str,
        days: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<SourceError>>> {
        let symbol = symbol.to_owned();
        Box::pin(async move {
            let (start, end) = chart_window(seoul_today(), days);
            let url = format!("{CHART_BASE_URL}/{symbol}/day");
            let params = [
                ("startDateTime", start.as_str()),
                ("endDateTime", end.as_str()),
            ];

            let raw: Vec<KrxDayBar> = self.get_json(&url, &params).await?;

            debug!(
                symbol = %symbol,
                fetched = raw.len(),
                from = %start,
                to = %end,
                "krx candle fetch complete"
            );

            let mut candles = raw
                .into_iter()
                .map(KrxDayBar::into_candle)
                .collect::<Result<Vec<_>, _>>()?;
            candles.sort_by_key(|c| c.date);
            Ok(candles)
        })
    }
}

/// Parse a display price such as `"71,500"`.
fn parse_display_price(s: &str) -> Result<Decimal, Report<SourceError>> {
    Decimal::from_str(&s.replace(',', ""))
        .change_context(parse_error())
        .attach_with(|| format!("price: {s}"))
}

// ── REST response types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KrxBasic {
    item_code: String,
    close_price: String,
    local_traded_at: Option<String>,
}

impl KrxBasic {
    fn into_quote(self) -> Result<Quote, Report<SourceError>> {
        let timestamp = self
            .local_traded_at
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));

        Ok(Quote {
            source: SourceKind::Krx,
            price: parse_display_price(&self.close_price)?,
            symbol: self.item_code,
            timestamp,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KrxDayBar {
    local_date: String,
    high_price: Decimal,
    close_price: Decimal,
}

impl KrxDayBar {
    fn into_candle(self) -> Result<Candle, Report<SourceError>> {
        let date = NaiveDate::parse_from_str(&self.local_date, CHART_DATE_FORMAT)
            .change_context(parse_error())
            .attach_with(|| format!("localDate: {}", self.local_date))?;

        Ok(Candle {
            date,
            high: self.high_price,
            close: self.close_price,
        })
    }
}

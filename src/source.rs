pub mod binance;
pub mod krx;
pub mod upbit;

use error_stack::Report;
use futures::future::BoxFuture;

use crate::error::SourceError;
use crate::model::{Candle, Quote, SourceKind};

/// Abstraction over a market price feed.
///
/// Uses `BoxFuture` (from `futures` crate) instead of `async fn` in trait
/// to keep the trait object-safe (`dyn PriceSource`).
pub trait PriceSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Fetch the latest traded price via REST API.
    fn fetch_quote(&self, symbol: &str) -> BoxFuture<'_, Result<Quote, Report<SourceError>>>;

    /// Fetch up to `days` daily bars, oldest first.
    fn fetch_daily_candles(
        &self,
        symbol: &str,
        days: usize,
    ) -> BoxFuture<'_, Result<Vec<Candle>, Report<SourceError>>>;
}

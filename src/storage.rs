pub mod sqlite;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::BoxFuture;
use rust_decimal::Decimal;

use crate::error::StorageError;
use crate::model::SourceKind;
use crate::stoploss::realert::AlertState;

/// A sent stop-loss alert, as appended to the alert log.
#[derive(Debug, Clone)]
pub struct AlertRecord {
    pub source: SourceKind,
    pub symbol: String,
    pub display_name: String,
    pub price: Decimal,
    pub high: Decimal,
    pub danger_level: Decimal,
    pub sent_at: DateTime<Utc>,
}

pub trait Storage: Send + Sync {
    /// High-water marks carried over from earlier cycles, keyed by symbol.
    fn load_highs(&self) -> BoxFuture<'_, Result<HashMap<String, Decimal>, Report<StorageError>>>;

    /// Persist `high` for `symbol`. The stored value never decreases.
    fn save_high(&self, symbol: &str, high: Decimal) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn load_alert_state(&self) -> BoxFuture<'_, Result<AlertState, Report<StorageError>>>;

    fn save_alert_price(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>>;

    fn log_alert(&self, record: &AlertRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>>;
}

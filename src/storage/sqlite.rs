use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use error_stack::{Report, ResultExt};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

use crate::error::StorageError;
use crate::stoploss::realert::AlertState;
use crate::storage::{AlertRecord, Storage};

pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path` and run migrations.
    pub async fn open(path: &Path) -> Result<Self, Report<StorageError>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .change_context(StorageError::Migration)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .change_context(StorageError::Migration)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(opts)
            .await
            .change_context(StorageError::Migration)
            .attach_with(|| format!("database path: {}", path.display()))?;

        Self::migrate(pool).await
    }

    /// Open a process-lifetime database that is discarded on exit.
    pub async fn open_in_memory() -> Result<Self, Report<StorageError>> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .change_context(StorageError::Migration)?;

        // Each connection to `:memory:` is its own database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(opts)
            .await
            .change_context(StorageError::Migration)?;

        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, Report<StorageError>> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .change_context(StorageError::Migration)?;

        Ok(Self { pool })
    }
}

impl Storage for SqliteStorage {
    fn load_highs(&self) -> BoxFuture<'_, Result<HashMap<String, Decimal>, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT symbol, high FROM price_highs")
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            parse_price_rows(rows)
        })
    }

    fn save_high(
        &self,
        symbol: &str,
        high: Decimal,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO price_highs (symbol, high, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(symbol) DO UPDATE SET \
                 high = CASE WHEN CAST(excluded.high AS REAL) > CAST(price_highs.high AS REAL) \
                        THEN excluded.high ELSE price_highs.high END, \
                 updated_at = excluded.updated_at",
            )
            .bind(&symbol)
            .bind(high.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("symbol: {symbol}"))?;
            Ok(())
        })
    }

    fn load_alert_state(&self) -> BoxFuture<'_, Result<AlertState, Report<StorageError>>> {
        Box::pin(async move {
            let rows: Vec<(String, String)> =
                sqlx::query_as("SELECT symbol, last_alerted_price FROM alert_state")
                    .fetch_all(&self.pool)
                    .await
                    .change_context(StorageError::Query)?;

            Ok(parse_price_rows(rows)?.into_iter().collect())
        })
    }

    fn save_alert_price(
        &self,
        symbol: &str,
        price: Decimal,
    ) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let symbol = symbol.to_string();
        Box::pin(async move {
            sqlx::query(
                "INSERT OR REPLACE INTO alert_state (symbol, last_alerted_price, updated_at) \
                 VALUES (?, ?, ?)",
            )
            .bind(&symbol)
            .bind(price.to_string())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)
            .attach_with(|| format!("symbol: {symbol}"))?;
            Ok(())
        })
    }

    fn log_alert(&self, record: &AlertRecord) -> BoxFuture<'_, Result<(), Report<StorageError>>> {
        let record = record.clone();
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO alerts_log \
                 (source, symbol, display_name, price, high, danger_level, sent_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(record.source.to_string())
            .bind(&record.symbol)
            .bind(&record.display_name)
            .bind(record.price.to_string())
            .bind(record.high.to_string())
            .bind(record.danger_level.to_string())
            .bind(record.sent_at.to_rfc3339())
            .execute(&self.pool)
            .await
            .change_context(StorageError::Insert)?;
            Ok(())
        })
    }
}

fn parse_price_rows(
    rows: Vec<(String, String)>,
) -> Result<HashMap<String, Decimal>, Report<StorageError>> {
    rows.into_iter()
        .map(|(symbol, raw)| {
            let price = Decimal::from_str(&raw)
                .change_context(StorageError::Query)
                .attach_with(|| format!("symbol: {symbol}, stored price: {raw}"))?;
            Ok((symbol, price))
        })
        .collect()
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Upbit,
    Binance,
    Krx,
}

impl SourceKind {
    /// Parse a config-format source name.
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "upbit" => Some(Self::Upbit),
            "binance" => Some(Self::Binance),
            "krx" => Some(Self::Krx),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upbit => write!(f, "upbit"),
            Self::Binance => write!(f, "binance"),
            Self::Krx => write!(f, "krx"),
        }
    }
}

/// One daily bar of a trailing-high window.
#[derive(Debug, Clone)]
pub struct Candle {
    pub date: NaiveDate,
    pub high: Decimal,
    pub close: Decimal,
}

/// Latest traded price for a symbol.
#[derive(Debug, Clone)]
pub struct Quote {
    pub source: SourceKind,
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// A tracked holding from the watchlist.
#[derive(Debug, Clone)]
pub struct Position {
    pub source: SourceKind,
    pub symbol: String,
    pub display_name: String,
    /// Best previously known peak, 0 when none is known yet.
    pub recorded_high: Decimal,
    pub trailing_days: usize,
}

/// Outcome of asking a price source for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum PriceFetch {
    Price(Decimal),
    Unavailable { reason: String },
}

impl PriceFetch {
    /// Accept `price` only when it is strictly positive.
    pub fn checked(price: Decimal) -> Self {
        if price > Decimal::ZERO {
            Self::Price(price)
        } else {
            Self::Unavailable {
                reason: format!("non-positive price {price}"),
            }
        }
    }

    pub fn price(&self) -> Option<Decimal> {
        match self {
            Self::Price(p) => Some(*p),
            Self::Unavailable { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            Self::Price(_) => None,
            Self::Unavailable { reason } => Some(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn source_kind_parses_config_names() {
        assert_eq!(SourceKind::from_name("upbit"), Some(SourceKind::Upbit));
        assert_eq!(SourceKind::from_name("binance"), Some(SourceKind::Binance));
        assert_eq!(SourceKind::from_name("krx"), Some(SourceKind::Krx));
        assert_eq!(SourceKind::from_name("nyse"), None);
        assert_eq!(SourceKind::from_name(""), None);
    }

    #[test]
    fn source_kind_display() {
        assert_eq!(SourceKind::Upbit.to_string(), "upbit");
        assert_eq!(SourceKind::Binance.to_string(), "binance");
        assert_eq!(SourceKind::Krx.to_string(), "krx");
    }

    #[test]
    fn source_kind_serializes_lowercase() {
        let json = serde_json::to_string(&SourceKind::Binance).unwrap();
        assert_eq!(json, "\"binance\"");
    }

    #[test]
    fn unavailable_fetch_has_no_price() {
        let fetch = PriceFetch::Unavailable {
            reason: "timeout".into(),
        };
        assert_eq!(fetch.price(), None);
        assert_eq!(fetch.failure_reason(), Some("timeout"));
        assert_eq!(PriceFetch::Price(dec!(8400)).price(), Some(dec!(8400)));
        assert_eq!(PriceFetch::Price(dec!(8400)).failure_reason(), None);
    }

    #[test]
    fn checked_rejects_non_positive_prices() {
        assert_eq!(PriceFetch::checked(dec!(5.61)), PriceFetch::Price(dec!(5.61)));

        for price in [Decimal::ZERO, dec!(-1)] {
            let fetch = PriceFetch::checked(price);
            assert_eq!(fetch.price(), None);
            assert!(fetch.failure_reason().unwrap().contains("non-positive"));
        }
    }
}

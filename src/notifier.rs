pub mod terminal;

use rust_decimal::Decimal;

use crate::model::SourceKind;

/// A `Danger` position that passed the re-alert check.
#[derive(Debug, Clone)]
pub struct Alert {
    pub source: SourceKind,
    pub symbol: String,
    pub display_name: String,
    pub price: Decimal,
    pub high: Decimal,
    pub danger_level: Decimal,
    /// Price at which the previous alert went out, if any.
    pub previous_alert_price: Option<Decimal>,
}

impl Alert {
    /// Percentage decline of `price` from `high`.
    pub fn drawdown_pct(&self) -> Decimal {
        if self.high > Decimal::ZERO {
            (Decimal::ONE - self.price / self.high) * Decimal::ONE_HUNDRED
        } else {
            Decimal::ZERO
        }
    }
}

/// Sink for stop-loss alerts.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert);
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn drawdown_is_relative_to_high() {
        let alert = Alert {
            source: SourceKind::Upbit,
            symbol: "005930".into(),
            display_name: "Samsung".into(),
            price: dec!(8400),
            high: dec!(10000),
            danger_level: dec!(8500),
            previous_alert_price: None,
        };
        assert_eq!(alert.drawdown_pct(), dec!(16));
    }
}

use std::collections::HashMap;

use rust_decimal::Decimal;

/// Decide whether a `Danger` observation warrants a new alert.
///
/// Returns `true` when nothing was alerted yet, or when price has fallen to
/// `last_alerted * factor` or below.
pub fn should_alert(current_price: Decimal, last_alerted: Option<Decimal>, factor: Decimal) -> bool {
    match last_alerted {
        None => true,
        Some(last) => current_price <= last * factor,
    }
}

/// Per-symbol memory of the last price at which an alert went out.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertState {
    last_alerted: HashMap<String, Decimal>,
}

impl AlertState {
    pub fn last_alerted(&self, symbol: &str) -> Option<Decimal> {
        self.last_alerted.get(symbol).copied()
    }

    pub fn should_alert(&self, symbol: &str, current_price: Decimal, factor: Decimal) -> bool {
        should_alert(current_price, self.last_alerted(symbol), factor)
    }

    /// Remember `price` as the latest alerted price for `symbol`.
    pub fn record(&mut self, symbol: &str, price: Decimal) {
        self.last_alerted.insert(symbol.to_owned(), price);
    }

    pub fn len(&self) -> usize {
        self.last_alerted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_alerted.is_empty()
    }
}

impl FromIterator<(String, Decimal)> for AlertState {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        Self {
            last_alerted: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    const FACTOR: Decimal = dec!(0.97);

    #[test]
    fn first_danger_always_alerts() {
        assert!(should_alert(dec!(8400), None, FACTOR));
    }

    #[test]
    fn insufficient_further_decline_is_suppressed() {
        // 8400 * 0.97 = 8148
        assert!(!should_alert(dec!(8300), Some(dec!(8400)), FACTOR));
        assert!(!should_alert(dec!(8400), Some(dec!(8400)), FACTOR));
    }

    #[test]
    fn further_decline_realerts() {
        assert!(should_alert(dec!(8100), Some(dec!(8400)), FACTOR));
        assert!(should_alert(dec!(8148), Some(dec!(8400)), FACTOR));
    }

    #[test]
    fn fractional_decline_exactly_at_factor_realerts() {
        // 5.61 * 0.97 = 5.4417, 0.3 * 0.97 = 0.291
        assert!(should_alert(dec!(5.4417), Some(dec!(5.61)), FACTOR));
        assert!(!should_alert(dec!(5.4418), Some(dec!(5.61)), FACTOR));
        assert!(should_alert(dec!(0.291), Some(dec!(0.3)), FACTOR));
    }

    #[test]
    fn state_tracks_symbols_independently() {
        let mut state = AlertState::default();
        assert!(state.is_empty());
        state.record("005930", dec!(8400));

        assert!(!state.should_alert("005930", dec!(8300), FACTOR));
        assert!(state.should_alert("000100", dec!(8300), FACTOR));
        assert_eq!(state.last_alerted("005930"), Some(dec!(8400)));
        assert_eq!(state.last_alerted("000100"), None);
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn record_overwrites_previous_price() {
        let mut state = AlertState::default();
        state.record("005930", dec!(8400));
        state.record("005930", dec!(8100));
        assert_eq!(state.last_alerted("005930"), Some(dec!(8100)));
        // 8100 * 0.97 = 7857
        assert!(!state.should_alert("005930", dec!(7900), FACTOR));
        assert!(state.should_alert("005930", dec!(7850), FACTOR));
    }

    #[test]
    fn state_collects_from_pairs() {
        let state: AlertState = vec![("KRW-BTC".to_owned(), dec!(1))].into_iter().collect();
        assert_eq!(state.last_alerted("KRW-BTC"), Some(dec!(1)));
    }
}

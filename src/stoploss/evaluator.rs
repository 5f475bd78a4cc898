use rust_decimal::Decimal;

use crate::model::Candle;
use crate::stoploss::{Classification, Evaluation, StopLossBands};

/// Evaluate a price against its high-water mark using the default 10% / 15% bands.
pub fn evaluate(current_price: Option<Decimal>, recorded_high: Decimal) -> Evaluation {
    StopLossBands::default().evaluate(current_price, recorded_high)
}

impl StopLossBands {
    /// Classify `current_price` against `recorded_high`, raising the high when
    /// the live price exceeds it.
    ///
    /// A missing or non-positive price degrades to `Unknown` and leaves the
    /// high untouched. Touching a band counts as breaching it.
    pub fn evaluate(&self, current_price: Option<Decimal>, recorded_high: Decimal) -> Evaluation {
        let known_high = is_valid_price(recorded_high).then_some(recorded_high);

        let Some(price) = current_price.filter(|p| is_valid_price(*p)) else {
            return Evaluation {
                updated_high: recorded_high,
                classification: Classification::Unknown,
                warn_level: known_high.map(|h| self.warn_level(h)),
                danger_level: known_high.map(|h| self.danger_level(h)),
                baseline: false,
            };
        };

        let updated_high = known_high.map_or(price, |h| h.max(price));
        let warn_level = self.warn_level(updated_high);
        let danger_level = self.danger_level(updated_high);

        let classification = if price <= danger_level {
            Classification::Danger
        } else if price <= warn_level {
            Classification::Warning
        } else {
            Classification::Safe
        };

        Evaluation {
            updated_high,
            classification,
            warn_level: Some(warn_level),
            danger_level: Some(danger_level),
            baseline: known_high.is_none(),
        }
    }

    fn warn_level(&self, high: Decimal) -> Decimal {
        (high * self.warn_ratio).normalize()
    }

    fn danger_level(&self, high: Decimal) -> Decimal {
        (high * self.danger_ratio).normalize()
    }
}

/// Highest daily high in the window, or 0 when nothing usable is present.
pub fn trailing_high(candles: &[Candle]) -> Decimal {
    candles
        .iter()
        .map(|c| c.high)
        .filter(|h| is_valid_price(*h))
        .max()
        .unwrap_or(Decimal::ZERO)
}

fn is_valid_price(value: Decimal) -> bool {
    value > Decimal::ZERO
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::*;

    fn candle(day: u32, high: Decimal) -> Candle {
        Candle {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            high,
            close: high,
        }
    }

    fn classify(price: Decimal, high: Decimal) -> Classification {
        evaluate(Some(price), high).classification
    }

    #[test]
    fn price_at_or_below_danger_is_danger() {
        assert_eq!(classify(dec!(8000), dec!(10000)), Classification::Danger);
        assert_eq!(classify(dec!(1), dec!(10000)), Classification::Danger);
    }

    #[test]
    fn price_between_bands_is_warning() {
        assert_eq!(classify(dec!(8600), dec!(10000)), Classification::Warning);
        assert_eq!(classify(dec!(9000), dec!(10000)), Classification::Warning);
    }

    #[test]
    fn price_above_warn_is_safe() {
        assert_eq!(classify(dec!(9001), dec!(10000)), Classification::Safe);
        assert_eq!(classify(dec!(10000), dec!(10000)), Classification::Safe);
    }

    #[test]
    fn danger_boundary_is_inclusive() {
        let result = evaluate(Some(dec!(850)), dec!(1000));
        assert_eq!(result.danger_level, Some(dec!(850)));
        assert_eq!(result.classification, Classification::Danger);
    }

    #[test]
    fn fractional_prices_on_a_band_breach_it() {
        // 6.6 * 0.85 = 5.61, 13.6 * 0.85 = 11.56
        for (price, high) in [(dec!(5.61), dec!(6.6)), (dec!(11.56), dec!(13.6))] {
            let result = evaluate(Some(price), high);
            assert_eq!(result.danger_level, Some(price));
            assert_eq!(result.classification, Classification::Danger, "{price} vs {high}");
        }

        // 6.6 * 0.90 = 5.94, 8.7 * 0.90 = 7.83
        for (price, high) in [(dec!(5.94), dec!(6.6)), (dec!(7.83), dec!(8.7))] {
            let result = evaluate(Some(price), high);
            assert_eq!(result.warn_level, Some(price));
            assert_eq!(result.classification, Classification::Warning, "{price} vs {high}");
        }
    }

    #[test]
    fn every_cent_high_classifies_its_own_levels_as_breached() {
        for cents in 1..=2000i64 {
            let high = Decimal::new(cents, 2);
            let result = evaluate(Some(high), high);
            let danger = result.danger_level.unwrap();
            let warn = result.warn_level.unwrap();
            assert_eq!(classify(danger, high), Classification::Danger, "high {high}");
            assert_eq!(classify(warn, high), Classification::Warning, "high {high}");
        }
    }

    #[test]
    fn new_high_replaces_recorded_high() {
        let result = evaluate(Some(dec!(1100)), dec!(1000));
        assert_eq!(result.updated_high, dec!(1100));
        assert_eq!(result.warn_level, Some(dec!(990)));
        assert_eq!(result.danger_level, Some(dec!(935)));
        assert_eq!(result.classification, Classification::Safe);
        assert!(!result.baseline);
    }

    #[test]
    fn high_never_decreases() {
        let prices = [
            Some(Decimal::ZERO),
            Some(dec!(1)),
            Some(dec!(500)),
            Some(dec!(999.99)),
            Some(dec!(1000)),
            Some(dec!(2000)),
            Some(dec!(-3)),
            None,
        ];
        for price in prices {
            let result = evaluate(price, dec!(1000));
            assert!(result.updated_high >= dec!(1000), "price {price:?} lowered the high");
        }
    }

    #[test]
    fn repeated_evaluation_is_identical() {
        assert_eq!(
            evaluate(Some(dec!(8400)), dec!(10000)),
            evaluate(Some(dec!(8400)), dec!(10000))
        );
    }

    #[test]
    fn missing_price_is_unknown_and_keeps_high() {
        let result = evaluate(None, dec!(1000));
        assert_eq!(result.classification, Classification::Unknown);
        assert_eq!(result.updated_high, dec!(1000));
        assert_eq!(result.warn_level, Some(dec!(900)));
        assert_eq!(result.danger_level, Some(dec!(850)));
    }

    #[test]
    fn non_positive_price_is_unknown() {
        for price in [Decimal::ZERO, dec!(-10)] {
            assert_eq!(classify(price, dec!(1000)), Classification::Unknown);
        }
    }

    #[test]
    fn unknown_without_high_has_no_levels() {
        let result = evaluate(None, Decimal::ZERO);
        assert_eq!(result.classification, Classification::Unknown);
        assert_eq!(result.updated_high, Decimal::ZERO);
        assert_eq!(result.warn_level, None);
        assert_eq!(result.danger_level, None);
    }

    #[test]
    fn first_observation_sets_baseline() {
        let result = evaluate(Some(dec!(500)), Decimal::ZERO);
        assert_eq!(result.updated_high, dec!(500));
        assert_eq!(result.classification, Classification::Safe);
        assert!(result.baseline);
    }

    #[test]
    fn custom_bands_shift_thresholds() {
        let bands = StopLossBands {
            warn_ratio: dec!(0.95),
            danger_ratio: dec!(0.80),
        };
        let classify = |p| bands.evaluate(Some(p), dec!(1000)).classification;
        assert_eq!(classify(dec!(940)), Classification::Warning);
        assert_eq!(classify(dec!(800)), Classification::Danger);
        assert_eq!(classify(dec!(950)), Classification::Warning);
        assert_eq!(classify(dec!(960)), Classification::Safe);
    }

    #[test]
    fn trailing_high_takes_max_of_window() {
        let candles = vec![
            candle(1, dec!(9500)),
            candle(2, dec!(10200)),
            candle(3, dec!(9900)),
        ];
        assert_eq!(trailing_high(&candles), dec!(10200));
    }

    #[test]
    fn trailing_high_ignores_bad_bars() {
        let candles = vec![candle(1, Decimal::ZERO), candle(2, dec!(-1)), candle(3, dec!(42))];
        assert_eq!(trailing_high(&candles), dec!(42));
        assert_eq!(trailing_high(&[]), Decimal::ZERO);
    }
}

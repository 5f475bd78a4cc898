pub mod evaluator;
pub mod realert;

use std::fmt;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::config::{AppConfig, StopLossConfig};

pub const DEFAULT_WARN_RATIO: Decimal = dec!(0.90);
pub const DEFAULT_DANGER_RATIO: Decimal = dec!(0.85);
pub const DEFAULT_REALERT_FACTOR: Decimal = dec!(0.97);

/// Drawdown severity of a position relative to its high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Safe,
    Warning,
    Danger,
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => write!(f, "safe"),
            Self::Warning => write!(f, "warning"),
            Self::Danger => write!(f, "danger"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a single evaluation step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    pub updated_high: Decimal,
    pub classification: Classification,
    pub warn_level: Option<Decimal>,
    pub danger_level: Option<Decimal>,
    /// The high was 0 and this observation set it.
    pub baseline: bool,
}

/// Multipliers applied to the high-water mark.
///
/// Invariant: `0 < danger_ratio < warn_ratio < 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLossBands {
    pub warn_ratio: Decimal,
    pub danger_ratio: Decimal,
}

impl Default for StopLossBands {
    fn default() -> Self {
        Self {
            warn_ratio: DEFAULT_WARN_RATIO,
            danger_ratio: DEFAULT_DANGER_RATIO,
        }
    }
}

/// Stop-loss settings resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLossPolicy {
    pub bands: StopLossBands,
    /// An alert repeats only once price is at or below `last_alerted * realert_factor`.
    pub realert_factor: Decimal,
}

impl Default for StopLossPolicy {
    fn default() -> Self {
        Self {
            bands: StopLossBands::default(),
            realert_factor: DEFAULT_REALERT_FACTOR,
        }
    }
}

impl StopLossPolicy {
    /// Build the policy from a validated `AppConfig`.
    pub fn from_config(config: &AppConfig) -> Self {
        config
            .stop_loss
            .as_ref()
            .map(policy_from_section)
            .unwrap_or_default()
    }
}

fn policy_from_section(section: &StopLossConfig) -> StopLossPolicy {
    StopLossPolicy {
        bands: StopLossBands {
            warn_ratio: ratio_below(section.warn_pct),
            danger_ratio: ratio_below(section.danger_pct),
        },
        realert_factor: ratio_below(section.realert_decline_pct),
    }
}

fn ratio_below(pct: Decimal) -> Decimal {
    Decimal::ONE - pct / Decimal::ONE_HUNDRED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_stop_loss_discipline() {
        let policy = StopLossPolicy::default();
        assert_eq!(policy.bands.warn_ratio, dec!(0.90));
        assert_eq!(policy.bands.danger_ratio, dec!(0.85));
        assert_eq!(policy.realert_factor, dec!(0.97));
    }

    #[test]
    fn policy_converts_percentages_to_ratios() {
        let section = StopLossConfig {
            warn_pct: dec!(5),
            danger_pct: dec!(20),
            realert_decline_pct: dec!(2.5),
        };
        let policy = policy_from_section(&section);
        assert_eq!(policy.bands.warn_ratio, dec!(0.95));
        assert_eq!(policy.bands.danger_ratio, dec!(0.80));
        assert_eq!(policy.realert_factor, dec!(0.975));
    }

    #[test]
    fn example_config_yields_exact_default_factors() {
        let config: AppConfig = toml::from_str(include_str!("../config.example.toml")).unwrap();
        let policy = StopLossPolicy::from_config(&config);
        assert_eq!(policy.bands.warn_ratio, dec!(0.90));
        assert_eq!(policy.bands.danger_ratio, dec!(0.85));
        assert_eq!(policy.realert_factor, dec!(0.97));
        assert_eq!(policy, StopLossPolicy::default());
    }

    #[test]
    fn classification_display_is_lowercase() {
        assert_eq!(Classification::Danger.to_string(), "danger");
        assert_eq!(Classification::Unknown.to_string(), "unknown");
    }
}

use std::path::Path;

use error_stack::{Report, ResultExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::model::{Position, SourceKind};

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_trailing_days() -> usize {
    100
}

fn default_warn_pct() -> Decimal {
    dec!(10)
}

fn default_danger_pct() -> Decimal {
    dec!(15)
}

fn default_realert_decline_pct() -> Decimal {
    dec!(3)
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    pub general: GeneralConfig,
    pub stop_loss: Option<StopLossConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub positions: Vec<PositionConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Days of daily bars folded into each position's high.
    #[serde(default = "default_trailing_days")]
    pub trailing_days: usize,
}

#[derive(Debug, Deserialize)]
pub struct StopLossConfig {
    #[serde(default = "default_warn_pct")]
    pub warn_pct: Decimal,
    #[serde(default = "default_danger_pct")]
    pub danger_pct: Decimal,
    #[serde(default = "default_realert_decline_pct")]
    pub realert_decline_pct: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct PositionConfig {
    pub source: String,
    pub symbol: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub recorded_high: Decimal,
    pub trailing_days: Option<usize>,
}

impl AppConfig {
    /// Watchlist entries whose source is configured and enabled.
    pub fn watchlist(&self) -> Vec<Position> {
        self.positions
            .iter()
            .filter(|p| {
                self.sources
                    .iter()
                    .any(|s| s.enabled && s.name == p.source)
            })
            .filter_map(|p| {
                Some(Position {
                    source: SourceKind::from_name(&p.source)?,
                    symbol: p.symbol.clone(),
                    display_name: p.display_name.clone().unwrap_or_else(|| p.symbol.clone()),
                    recorded_high: p.recorded_high,
                    trailing_days: p.trailing_days.unwrap_or(self.general.trailing_days),
                })
            })
            .collect()
    }
}

/// Load and validate an `AppConfig` from a TOML file at `path`.
pub fn load(path: &Path) -> Result<AppConfig, Report<ConfigError>> {
    let content = std::fs::read_to_string(path)
        .change_context(ConfigError::ReadFile)
        .attach_with(|| format!("path: {}", path.display()))?;

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    validate_general(config)?;
    validate_stop_loss(config)?;
    validate_source_names(config)?;
    validate_position_sources(config)?;
    validate_positions(config)?;
    Ok(())
}

fn invalid(field: String) -> Report<ConfigError> {
    Report::new(ConfigError::Validation { field })
}

fn validate_general(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if config.general.poll_interval_secs == 0 {
        return Err(invalid("general.poll_interval_secs must be > 0".into()));
    }
    if config.general.trailing_days == 0 {
        return Err(invalid("general.trailing_days must be > 0".into()));
    }
    Ok(())
}

fn validate_stop_loss(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let Some(section) = &config.stop_loss else {
        return Ok(());
    };

    if !in_open_percent_range(section.warn_pct) {
        return Err(invalid(format!(
            "stop_loss.warn_pct {} must be in (0, 100)",
            section.warn_pct
        )));
    }
    if !(section.danger_pct > section.warn_pct && section.danger_pct < Decimal::ONE_HUNDRED) {
        return Err(invalid(format!(
            "stop_loss.danger_pct {} must be greater than warn_pct {} and below 100",
            section.danger_pct, section.warn_pct
        )));
    }
    if !in_open_percent_range(section.realert_decline_pct) {
        return Err(invalid(format!(
            "stop_loss.realert_decline_pct {} must be in (0, 100)",
            section.realert_decline_pct
        )));
    }
    Ok(())
}

fn in_open_percent_range(pct: Decimal) -> bool {
    pct > Decimal::ZERO && pct < Decimal::ONE_HUNDRED
}

fn validate_source_names(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    for source in &config.sources {
        if SourceKind::from_name(&source.name).is_none() {
            return Err(invalid(format!(
                "sources[name={}]: unknown price source",
                source.name
            )));
        }
    }
    Ok(())
}

fn validate_position_sources(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let source_names: std::collections::HashSet<&str> =
        config.sources.iter().map(|s| s.name.as_str()).collect();

    for position in &config.positions {
        if !source_names.contains(position.source.as_str()) {
            return Err(invalid(format!(
                "positions[symbol={}].source \"{}\" does not match any source name",
                position.symbol, position.source
            )));
        }
    }
    Ok(())
}

fn validate_positions(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    let mut seen = std::collections::HashSet::new();
    for position in &config.positions {
        if !seen.insert(position.symbol.as_str()) {
            return Err(invalid(format!(
                "positions: duplicate symbol \"{}\"",
                position.symbol
            )));
        }
        if position.recorded_high < Decimal::ZERO {
            return Err(invalid(format!(
                "positions[symbol={}].recorded_high must be >= 0",
                position.symbol
            )));
        }
        if position.trailing_days == Some(0) {
            return Err(invalid(format!(
                "positions[symbol={}].trailing_days must be > 0",
                position.symbol
            )));
        }
    }
    Ok(())
}

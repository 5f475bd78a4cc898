use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use error_stack::Report;
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::model::{Position, PriceFetch, SourceKind};
use crate::notifier::{Alert, Notifier};
use crate::source::PriceSource;
use crate::stoploss::evaluator::trailing_high;
use crate::stoploss::realert::AlertState;
use crate::stoploss::{Classification, Evaluation, StopLossPolicy};
use crate::storage::{AlertRecord, Storage};

/// What a price source reported for one position in one cycle.
#[derive(Debug, Clone)]
struct MarketSnapshot {
    fetch: PriceFetch,
    trailing_high: Decimal,
    as_of: Option<DateTime<Utc>>,
}

/// One row of a cycle's report.
#[derive(Debug, Clone, Serialize)]
pub struct PositionReport {
    pub source: SourceKind,
    pub symbol: String,
    pub display_name: String,
    pub price: Option<Decimal>,
    pub as_of: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub evaluation: Evaluation,
    pub failure: Option<String>,
    pub alerted: bool,
}

/// Runs polling cycles over a fixed watchlist.
///
/// Owns the carried-over highs and the re-alert memory; `run_cycle` takes
/// `&mut self`, so two cycles over the same watchlist never overlap.
pub struct Watcher {
    positions: Vec<Position>,
    sources: HashMap<SourceKind, Arc<dyn PriceSource>>,
    storage: Arc<dyn Storage>,
    notifier: Arc<dyn Notifier>,
    policy: StopLossPolicy,
    highs: HashMap<String, Decimal>,
    alert_state: AlertState,
}

impl Watcher {
    /// Build a watcher, restoring highs and alert state from `storage`.
    pub async fn new(
        positions: Vec<Position>,
        sources: Vec<Arc<dyn PriceSource>>,
        storage: Arc<dyn Storage>,
        notifier: Arc<dyn Notifier>,
        policy: StopLossPolicy,
    ) -> Result<Self, Report<StorageError>> {
        let highs = storage.load_highs().await?;
        let alert_state = storage.load_alert_state().await?;

        info!(
            positions = positions.len(),
            carried_highs = highs.len(),
            alerted_symbols = alert_state.len(),
            "watcher state restored"
        );

        Ok(Self {
            positions,
            sources: sources.into_iter().map(|s| (s.kind(), s)).collect(),
            storage,
            notifier,
            policy,
            highs,
            alert_state,
        })
    }

    /// Fetch, evaluate and alert on every position once.
    ///
    /// A failure for one symbol degrades that row to `Unknown` and never stops
    /// the rest of the watchlist.
    pub async fn run_cycle(&mut self) -> Vec<PositionReport> {
        let positions = std::mem::take(&mut self.positions);
        let snapshots = join_all(positions.iter().map(|p| self.fetch_snapshot(p))).await;

        let mut reports = Vec::with_capacity(positions.len());
        for (position, snapshot) in positions.iter().zip(snapshots) {
            reports.push(self.process_position(position, snapshot).await);
        }
        self.positions = positions;
        reports
    }

    async fn fetch_snapshot(&self, position: &Position) -> MarketSnapshot {
        let Some(source) = self.sources.get(&position.source) else {
            return MarketSnapshot {
                fetch: PriceFetch::Unavailable {
                    reason: format!("price source {} is not enabled", position.source),
                },
                trailing_high: Decimal::ZERO,
                as_of: None,
            };
        };

        let (quote, candles) = tokio::join!(
            source.fetch_quote(&position.symbol),
            source.fetch_daily_candles(&position.symbol, position.trailing_days),
        );

        let candles = match candles {
            Ok(c) => {
                if let (Some(first), Some(last)) = (c.first(), c.last()) {
                    debug!(
                        symbol = %position.symbol,
                        bars = c.len(),
                        from = %first.date,
                        to = %last.date,
                        "trailing window loaded"
                    );
                }
                c
            }
            Err(e) => {
                warn!(error = ?e, symbol = %position.symbol, "trailing window fetch failed");
                Vec::new()
            }
        };

        let (fetch, as_of) = match quote {
            Ok(q) => {
                debug!(source = %q.source, symbol = %q.symbol, price = %q.price, "quote received");
                (PriceFetch::checked(q.price), Some(q.timestamp))
            }
            Err(e) => {
                warn!(error = ?e, symbol = %position.symbol, "quote fetch failed");
                let reason = e.current_context().to_string();
                (PriceFetch::Unavailable { reason }, None)
            }
        };

        // Fall back to the latest daily close when the window is available.
        let (fetch, as_of) = match (fetch, candles.last()) {
            (PriceFetch::Unavailable { reason }, Some(last)) => {
                debug!(
                    symbol = %position.symbol,
                    reason = %reason,
                    close = %last.close,
                    date = %last.date,
                    "pricing from latest daily close"
                );
                (PriceFetch::checked(last.close), None)
            }
            (fetch, _) => (fetch, as_of),
        };

        MarketSnapshot {
            fetch,
            trailing_high: trailing_high(&candles),
            as_of,
        }
    }

    async fn process_position(
        &mut self,
        position: &Position,
        snapshot: MarketSnapshot,
    ) -> PositionReport {
        let carried = self
            .highs
            .get(&position.symbol)
            .copied()
            .unwrap_or(Decimal::ZERO);
        let recorded_high = [position.recorded_high, carried, snapshot.trailing_high]
            .into_iter()
            .max()
            .unwrap_or(Decimal::ZERO);

        let price = snapshot.fetch.price();
        let evaluation = self.policy.bands.evaluate(price, recorded_high);

        if evaluation.updated_high > carried {
            self.highs
                .insert(position.symbol.clone(), evaluation.updated_high);
            if let Err(e) = self
                .storage
                .save_high(&position.symbol, evaluation.updated_high)
                .await
            {
                warn!(error = ?e, symbol = %position.symbol, "failed to persist high");
            }
        }

        let alerted = match (evaluation.classification, price) {
            (Classification::Danger, Some(price)) => {
                self.maybe_alert(position, price, &evaluation).await
            }
            _ => false,
        };

        PositionReport {
            source: position.source,
            symbol: position.symbol.clone(),
            display_name: position.display_name.clone(),
            price,
            as_of: snapshot.as_of,
            evaluation,
            failure: snapshot.fetch.failure_reason().map(str::to_owned),
            alerted,
        }
    }

    async fn maybe_alert(
        &mut self,
        position: &Position,
        price: Decimal,
        evaluation: &Evaluation,
    ) -> bool {
        let previous = self.alert_state.last_alerted(&position.symbol);
        if !self
            .alert_state
            .should_alert(&position.symbol, price, self.policy.realert_factor)
        {
            debug!(
                symbol = %position.symbol,
                price = %price,
                last_alerted = ?previous,
                "alert suppressed until further decline"
            );
            return false;
        }

        let alert = Alert {
            source: position.source,
            symbol: position.symbol.clone(),
            display_name: position.display_name.clone(),
            price,
            high: evaluation.updated_high,
            danger_level: evaluation.danger_level.unwrap_or_default(),
            previous_alert_price: previous,
        };
        self.notifier.notify(&alert);
        self.alert_state.record(&position.symbol, price);

        if let Err(e) = self.storage.save_alert_price(&position.symbol, price).await {
            warn!(error = ?e, symbol = %position.symbol, "failed to persist alert state");
        }

        let record = AlertRecord {
            source: alert.source,
            symbol: alert.symbol,
            display_name: alert.display_name,
            price: alert.price,
            high: alert.high,
            danger_level: alert.danger_level,
            sent_at: Utc::now(),
        };
        if let Err(e) = self.storage.log_alert(&record).await {
            warn!(error = ?e, "failed to log alert");
        }

        true
    }
}

/// Poll every `interval` until `cancel` fires. A slow cycle delays the next
/// tick instead of queueing extra cycles.
pub async fn watch_loop(mut watcher: Watcher, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("watch loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                let reports = watcher.run_cycle().await;
                log_reports(&reports);
            }
        }
    }
}

/// Emit one event per row plus a per-classification summary.
pub fn log_reports(reports: &[PositionReport]) {
    let mut counts: HashMap<Classification, usize> = HashMap::new();

    for r in reports {
        *counts.entry(r.evaluation.classification).or_default() += 1;
        match &r.failure {
            Some(reason) => warn!(
                symbol = %r.symbol,
                name = %r.display_name,
                high = %r.evaluation.updated_high,
                reason = %reason,
                "failed to load price"
            ),
            None => info!(
                symbol = %r.symbol,
                name = %r.display_name,
                price = ?r.price,
                high = %r.evaluation.updated_high,
                warn_level = ?r.evaluation.warn_level,
                danger_level = ?r.evaluation.danger_level,
                status = %r.evaluation.classification,
                baseline = r.evaluation.baseline,
                "position evaluated"
            ),
        }
    }

    let count = |c: Classification| counts.get(&c).copied().unwrap_or(0);
    info!(
        safe = count(Classification::Safe),
        warning = count(Classification::Warning),
        danger = count(Classification::Danger),
        unknown = count(Classification::Unknown),
        alerts = reports.iter().filter(|r| r.alerted).count(),
        "cycle complete"
    );
}

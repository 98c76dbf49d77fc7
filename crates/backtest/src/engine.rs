//! Event-replay backtest engine.
//!
//! The engine replays a [`PriceHistoryStore`] as one timestamp-ordered
//! stream and drives the same [`PositionLedger`] and [`RiskCoordinator`] the
//! live bot uses.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::AtomicBool;
//! use spikebot_backtest::{BacktestEngine, PriceHistoryStore};
//! use spikebot_core::BotConfig;
//!
//! let store = PriceHistoryStore::from_json_str(r#"[
//!     {"timestamp": "2026-01-15T14:30:00Z", "price": 0.50, "market_id": "FED-DEC"},
//!     {"timestamp": "2026-01-15T14:30:05Z", "price": 0.53, "market_id": "FED-DEC"}
//! ]"#).unwrap();
//!
//! let engine = BacktestEngine::new(BotConfig::default()).unwrap();
//! let result = engine.run(&store, &AtomicBool::new(false)).unwrap();
//! assert_eq!(result.spikes_detected, 1);
//! ```

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::{
    BotConfig, ConfigError, ExitReason, FeeEngine, FeeKind, LedgerError, Position, PositionId,
    PositionLedger,
};
use spikebot_risk::RiskCoordinator;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, info};

use crate::detector::{SignalDetector, ThresholdSpikeDetector};
use crate::history::{PriceHistoryStore, PricePoint};
use crate::metrics::{BacktestMetrics, EquityPoint, TradeRecord};

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error("invalid backtest configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("ledger rejected a simulated order: {0}")]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, BacktestError>;

/// Outcome of one replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Timestamp of the first replayed event.
    pub start_date: Option<DateTime<Utc>>,
    /// Timestamp of the last replayed event.
    pub end_date: Option<DateTime<Utc>>,
    pub detector: String,
    pub starting_balance: Decimal,
    /// Cash plus liquidation value of anything still open.
    pub final_balance: Decimal,
    pub total_return_pct: Decimal,
    pub trades: Vec<TradeRecord>,
    pub equity_curve: Vec<EquityPoint>,
    pub spikes_detected: u64,
    pub spikes_traded: u64,
    pub signal_anomalies: u64,
    /// Rejections by reason code.
    pub rejection_reasons: BTreeMap<String, u64>,
    pub metrics: BacktestMetrics,
    /// Points dropped for a price outside `[0, 1]`, plus history rows the
    /// store could not parse.
    pub skipped_points: u64,
    pub events_processed: u64,
    pub cancelled: bool,
    /// Positions left open by a cancelled run.
    pub open_positions: Vec<Position>,
    /// Net P&L of closed trades by close date.
    pub daily_pnl: BTreeMap<NaiveDate, Decimal>,
}

/// One point of the merged replay stream.
#[derive(Debug, Clone, Copy)]
struct ReplayEvent<'a> {
    market_id: &'a str,
    point: &'a PricePoint,
}

/// Mutable state of a single run.
struct Replay {
    ledger: PositionLedger,
    risk: RiskCoordinator,
    cash: Decimal,
    trades: Vec<TradeRecord>,
    equity_curve: Vec<EquityPoint>,
    daily_pnl: BTreeMap<NaiveDate, Decimal>,
    current_day: Option<NaiveDate>,
}

impl Replay {
    fn equity(&self) -> Decimal {
        self.cash + self.ledger.open_liquidation_value()
    }

    fn sample(&mut self, timestamp: DateTime<Utc>) {
        let point = EquityPoint {
            timestamp,
            equity: self.equity(),
            cash: self.cash,
            open_positions: self.ledger.open_count(),
        };
        self.equity_curve.push(point);
    }

    fn roll_day(&mut self, timestamp: DateTime<Utc>) {
        let day = timestamp.date_naive();
        if self.current_day == Some(day) {
            return;
        }
        self.current_day = Some(day);
        let equity = self.equity();
        self.risk.initialize_daily(equity, timestamp);
        self.daily_pnl.entry(day).or_insert(Decimal::ZERO);
    }

    fn close(
        &mut self,
        id: PositionId,
        price: Decimal,
        at: DateTime<Utc>,
        reason: ExitReason,
        exit_kind: FeeKind,
    ) -> Result<()> {
        let Some(position) = self.ledger.get(id).cloned() else {
            return Err(LedgerError::PositionNotFound(id).into());
        };
        let pnl = self.ledger.close(id, price, exit_kind, at, reason)?;

        self.cash += pnl.exit_revenue;
        self.risk.record_exit(id, &pnl, at);
        *self.daily_pnl.entry(at.date_naive()).or_insert(Decimal::ZERO) += pnl.net_profit;
        self.trades
            .push(TradeRecord::from_close(&position, &pnl, price, at, reason));
        Ok(())
    }
}

/// Replays historical prices through the fee, exit and risk rules.
#[derive(Debug, Clone)]
pub struct BacktestEngine {
    config: BotConfig,
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl BacktestEngine {
    /// # Errors
    ///
    /// Returns an error if any configuration section is invalid.
    pub fn new(config: BotConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            window: None,
        })
    }

    /// Restricts the replay to points with `start <= timestamp <= end`.
    #[must_use]
    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.window = Some((start, end));
        self
    }

    #[must_use]
    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Runs with a [`ThresholdSpikeDetector`] built from the spike settings.
    ///
    /// # Errors
    ///
    /// See [`run_with_detector`](Self::run_with_detector).
    pub fn run(&self, store: &PriceHistoryStore, cancel: &AtomicBool) -> Result<BacktestResult> {
        let mut detector = ThresholdSpikeDetector::new(self.config.spike.clone())?;
        self.run_with_detector(store, &mut detector, cancel)
    }

    /// Replays `store` through `detector`.
    ///
    /// `cancel` is checked before every event; a cancelled run returns the
    /// partial result with its open positions untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger refuses an order the risk checks
    /// accepted. Bad data points never fail the run.
    pub fn run_with_detector(
        &self,
        store: &PriceHistoryStore,
        detector: &mut dyn SignalDetector,
        cancel: &AtomicBool,
    ) -> Result<BacktestResult> {
        let settings = &self.config.backtest;
        let fee_kinds = settings.fee_kinds;

        let mut exits = self.config.exits.clone();
        exits.exit_fee_kind = fee_kinds.exit;
        let ledger = PositionLedger::new(FeeEngine::new(self.config.fees.clone())?, exits)?;
        let risk = RiskCoordinator::new(self.config.risk.clone())?;

        let events = self.merge(store);
        info!(
            detector = detector.name(),
            markets = store.market_count(),
            events = events.len(),
            starting_balance = %settings.starting_balance,
            "backtest started"
        );

        detector.reset();
        let mut replay = Replay {
            ledger,
            risk,
            cash: settings.starting_balance,
            trades: Vec::new(),
            equity_curve: Vec::new(),
            daily_pnl: BTreeMap::new(),
            current_day: None,
        };

        let mut spikes_detected = 0u64;
        let mut spikes_traded = 0u64;
        let mut signal_anomalies = 0u64;
        let mut skipped_points = store.rejected_records() as u64;
        let mut events_processed = 0u64;
        let mut rejection_reasons: BTreeMap<String, u64> = BTreeMap::new();
        let mut cancelled = false;
        let mut start_date = None;
        let mut end_date = None;

        for event in &events {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                info!(events_processed, "backtest cancelled");
                break;
            }

            let ReplayEvent { market_id, point } = *event;
            let at = point.timestamp;
            if point.price < Decimal::ZERO || point.price > Decimal::ONE {
                debug!(market_id, price = %point.price, %at, "skipping out-of-range price");
                skipped_points += 1;
                continue;
            }

            events_processed += 1;
            start_date.get_or_insert(at);
            end_date = Some(at);
            replay.roll_day(at);

            let detected = detector.on_point(market_id, point);

            if let Some(id) = replay.ledger.position_for_market(market_id).map(|p| p.id) {
                let decision = replay.ledger.evaluate_exit(id, point.price, at)?;
                if let Some(reason) = decision.reason {
                    replay.close(id, point.price, at, reason, fee_kinds.exit)?;
                }
            }

            match detected {
                Ok(Some(signal)) => {
                    spikes_detected += 1;
                    let candidate = signal.to_candidate(settings.contracts_per_trade);
                    let check = replay.risk.can_trade_pre_submission(
                        &candidate,
                        &replay.ledger,
                        replay.cash,
                        at,
                    );

                    if let Some(reason) = check.reason {
                        *rejection_reasons.entry(reason.as_str().to_string()).or_insert(0) += 1;
                    } else {
                        let position = replay.ledger.open(
                            market_id,
                            signal.side,
                            signal.price,
                            candidate.quantity,
                            fee_kinds.entry,
                            at,
                        )?;
                        replay.cash -= position.entry_cost;
                        replay.risk.record_entry(at);
                        spikes_traded += 1;
                    }
                }
                Ok(None) => {}
                Err(anomaly) => {
                    debug!(%anomaly, "ignoring anomalous move");
                    signal_anomalies += 1;
                }
            }

            if events_processed % settings.equity_sample_interval as u64 == 0 {
                replay.sample(at);
            }
        }

        if !cancelled {
            let remaining: Vec<(PositionId, Decimal, DateTime<Utc>)> = replay
                .ledger
                .open_positions()
                .map(|p| (p.id, p.current_price, p.last_updated))
                .collect();
            for (id, price, at) in remaining {
                replay.close(id, price, at, ExitReason::BacktestEnd, fee_kinds.exit)?;
            }
        }
        if let Some(at) = end_date {
            replay.sample(at);
        }

        let final_balance = replay.equity();
        let starting_balance = settings.starting_balance;
        let total_return_pct = (final_balance - starting_balance) / starting_balance;
        let metrics = BacktestMetrics::from_trades(&replay.trades, &replay.equity_curve, starting_balance);

        info!(
            trades = replay.trades.len(),
            spikes_detected,
            spikes_traded,
            skipped_points,
            %final_balance,
            %total_return_pct,
            cancelled,
            "backtest finished"
        );

        Ok(BacktestResult {
            start_date,
            end_date,
            detector: detector.name().to_string(),
            starting_balance,
            final_balance,
            total_return_pct,
            open_positions: replay.ledger.open_positions().cloned().collect(),
            trades: replay.trades,
            equity_curve: replay.equity_curve,
            spikes_detected,
            spikes_traded,
            signal_anomalies,
            rejection_reasons,
            metrics,
            skipped_points,
            events_processed,
            cancelled,
            daily_pnl: replay.daily_pnl,
        })
    }

    /// Stable merge of every market's series by timestamp.
    ///
    /// Markets are concatenated in key order before sorting, so ties keep
    /// market order and then per-market order.
    fn merge<'a>(&self, store: &'a PriceHistoryStore) -> Vec<ReplayEvent<'a>> {
        let mut events: Vec<ReplayEvent<'a>> = store
            .iter()
            .flat_map(|(market_id, points)| {
                points.iter().map(move |point| ReplayEvent { market_id, point })
            })
            .filter(|event| {
                self.window.map_or(true, |(start, end)| {
                    event.point.timestamp >= start && event.point.timestamp <= end
                })
            })
            .collect();
        events.sort_by_key(|event| event.point.timestamp);
        events
    }
}

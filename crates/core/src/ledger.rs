//! Position ledger shared by live trading and backtesting.
//!
//! The ledger owns every open position, enforces at most one open position
//! per market, and values positions through the [`FeeEngine`] so that exit
//! decisions are made on fee-adjusted P&L.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ExitConfig};
use crate::fees::{FeeEngine, FeeError, FeeKind, FeeKinds, PnLResult};
use crate::types::{PositionId, Side};

// =============================================================================
// Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Why a position was, or should be, closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ProfitTarget,
    StopLoss,
    TrailingStop,
    TimeLimit,
    BacktestEnd,
    /// Closed by a caller outside the threshold rules (strategy exit, unwind).
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ProfitTarget => "profit_target",
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::TimeLimit => "time_limit",
            Self::BacktestEnd => "backtest_end",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// A position on one market.
///
/// `entry_price`, `current_price` and `exit_price` are quoted YES prices;
/// fees and P&L use the price of the contract the side holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub market_id: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub quantity: u32,
    pub entry_fee_kind: FeeKind,
    /// Notional plus entry fee.
    pub entry_cost: Decimal,
    pub entry_fee: Decimal,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub current_price: Decimal,
    pub last_updated: DateTime<Utc>,
    /// Highest net P&L seen while open, floored at zero.
    pub peak_net_pnl: Decimal,
    pub exit_price: Option<Decimal>,
    pub exit_fee: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub close_reason: Option<ExitReason>,
}

impl Position {
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Price of the held contract at entry.
    #[must_use]
    pub fn contract_entry_price(&self) -> Decimal {
        self.side.contract_price(self.entry_price)
    }

    /// Time held as of `now`, or until close for closed positions.
    #[must_use]
    pub fn holding_time(&self, now: DateTime<Utc>) -> Duration {
        self.closed_at.unwrap_or(now) - self.opened_at
    }
}

/// Outcome of [`PositionLedger::evaluate_exit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitDecision {
    pub position_id: PositionId,
    /// The first exit rule that fired, in priority order.
    pub reason: Option<ExitReason>,
    /// Fee-adjusted P&L if the position were closed at the evaluated price.
    pub unrealized: PnLResult,
}

impl ExitDecision {
    #[must_use]
    pub fn should_exit(&self) -> bool {
        self.reason.is_some()
    }
}

/// Errors returned by the ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("market {market_id} already has open position {existing}")]
    DuplicatePosition {
        market_id: String,
        existing: PositionId,
    },

    #[error("position {0} not found or already closed")]
    PositionNotFound(PositionId),

    #[error("cannot open a position of zero contracts")]
    ZeroQuantity,

    #[error(transparent)]
    Fee(#[from] FeeError),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

// =============================================================================
// Ledger
// =============================================================================

/// Owner of all positions for one bot instance or one backtest run.
#[derive(Debug, Clone)]
pub struct PositionLedger {
    fees: FeeEngine,
    exits: ExitConfig,
    open: BTreeMap<PositionId, Position>,
    by_market: HashMap<String, PositionId>,
    closed: Vec<Position>,
    next_id: u64,
}

impl PositionLedger {
    /// Creates an empty ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the exit thresholds are invalid.
    pub fn new(fees: FeeEngine, exits: ExitConfig) -> std::result::Result<Self, ConfigError> {
        exits.validate()?;
        Ok(Self {
            fees,
            exits,
            open: BTreeMap::new(),
            by_market: HashMap::new(),
            closed: Vec::new(),
            next_id: 1,
        })
    }

    #[must_use]
    pub fn fees(&self) -> &FeeEngine {
        &self.fees
    }

    #[must_use]
    pub fn exit_config(&self) -> &ExitConfig {
        &self.exits
    }

    /// Opens a position, charging the entry fee.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::DuplicatePosition`] if the market already has an open position
    /// - [`LedgerError::ZeroQuantity`] for an empty order
    /// - [`LedgerError::Fee`] for a price outside `[0, 1]`
    pub fn open(
        &mut self,
        market_id: &str,
        side: Side,
        entry_price: Decimal,
        quantity: u32,
        fee_kind: FeeKind,
        opened_at: DateTime<Utc>,
    ) -> Result<Position> {
        if let Some(existing) = self.by_market.get(market_id) {
            return Err(LedgerError::DuplicatePosition {
                market_id: market_id.to_string(),
                existing: *existing,
            });
        }
        if quantity == 0 {
            return Err(LedgerError::ZeroQuantity);
        }

        let cost = self
            .fees
            .entry_cost(quantity, side.contract_price(entry_price), fee_kind)?;

        let id = PositionId(self.next_id);
        self.next_id += 1;

        let position = Position {
            id,
            market_id: market_id.to_string(),
            side,
            entry_price,
            quantity,
            entry_fee_kind: fee_kind,
            entry_cost: cost.total,
            entry_fee: cost.fee,
            opened_at,
            status: PositionStatus::Open,
            current_price: entry_price,
            last_updated: opened_at,
            peak_net_pnl: Decimal::ZERO,
            exit_price: None,
            exit_fee: None,
            realized_pnl: None,
            closed_at: None,
            close_reason: None,
        };

        info!(
            position_id = %id,
            market_id,
            %side,
            %entry_price,
            quantity,
            entry_cost = %cost.total,
            entry_fee = %cost.fee,
            "position opened"
        );

        self.by_market.insert(market_id.to_string(), id);
        self.open.insert(id, position.clone());
        Ok(position)
    }

    #[must_use]
    pub fn get(&self, id: PositionId) -> Option<&Position> {
        self.open.get(&id)
    }

    #[must_use]
    pub fn position_for_market(&self, market_id: &str) -> Option<&Position> {
        self.by_market.get(market_id).and_then(|id| self.open.get(id))
    }

    #[must_use]
    pub fn has_open_position(&self, market_id: &str) -> bool {
        self.by_market.contains_key(market_id)
    }

    /// Open positions in id order.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.open.values()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Closed positions in the order they were closed.
    #[must_use]
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    /// Fee-adjusted P&L of closing `position` at a quoted YES price.
    ///
    /// # Errors
    ///
    /// Returns an error for a price outside `[0, 1]`.
    pub fn unrealized_pnl(&self, position: &Position, yes_price: Decimal) -> Result<PnLResult> {
        let pnl = self.fees.calculate_pnl(
            position.contract_entry_price(),
            position.side.contract_price(yes_price),
            position.quantity,
            FeeKinds::new(position.entry_fee_kind, self.exits.exit_fee_kind),
        )?;
        Ok(pnl)
    }

    /// Cash the open positions would return if closed at their last price.
    #[must_use]
    pub fn open_liquidation_value(&self) -> Decimal {
        self.open
            .values()
            .filter_map(|position| {
                self.unrealized_pnl(position, position.current_price)
                    .ok()
                    .map(|pnl| pnl.exit_revenue)
            })
            .sum()
    }

    /// Records a new price and checks the exit rules.
    ///
    /// Rules are checked in priority order: profit target, stop loss,
    /// trailing stop (when configured), then holding time.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PositionNotFound`] for an unknown or closed position
    /// - [`LedgerError::Fee`] for a price outside `[0, 1]`
    pub fn evaluate_exit(
        &mut self,
        id: PositionId,
        current_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<ExitDecision> {
        let position = self.open.get(&id).ok_or(LedgerError::PositionNotFound(id))?;
        let unrealized = self.unrealized_pnl(position, current_price)?;
        let net = unrealized.net_profit;
        let held = position.holding_time(now);

        let peak = position.peak_net_pnl.max(net);
        let trailing_hit = self.exits.trailing_stop.as_ref().is_some_and(|trailing| {
            peak >= trailing.activation_usd && net <= peak - trailing.distance_usd
        });

        let reason = if net >= self.exits.target_profit_usd {
            Some(ExitReason::ProfitTarget)
        } else if net <= self.exits.stop_loss_usd {
            Some(ExitReason::StopLoss)
        } else if trailing_hit {
            Some(ExitReason::TrailingStop)
        } else if held >= self.exits.max_hold() {
            Some(ExitReason::TimeLimit)
        } else {
            None
        };

        if let Some(position) = self.open.get_mut(&id) {
            position.current_price = current_price;
            position.last_updated = now;
            position.peak_net_pnl = peak;
        }

        if let Some(reason) = reason {
            debug!(position_id = %id, %reason, net_pnl = %net, "exit condition met");
        }

        Ok(ExitDecision {
            position_id: id,
            reason,
            unrealized,
        })
    }

    /// Closes a position and returns its final P&L.
    ///
    /// The position is removed in the same call that values it, so a second
    /// close of the same id always sees [`LedgerError::PositionNotFound`].
    ///
    /// # Errors
    ///
    /// - [`LedgerError::PositionNotFound`] for an unknown or already closed position
    /// - [`LedgerError::Fee`] for a price outside `[0, 1]`; the position stays open
    pub fn close(
        &mut self,
        id: PositionId,
        exit_price: Decimal,
        fee_kind: FeeKind,
        closed_at: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<PnLResult> {
        let position = self.open.get(&id).ok_or(LedgerError::PositionNotFound(id))?;
        let pnl = self.fees.calculate_pnl(
            position.contract_entry_price(),
            position.side.contract_price(exit_price),
            position.quantity,
            FeeKinds::new(position.entry_fee_kind, fee_kind),
        )?;

        let Some(mut position) = self.open.remove(&id) else {
            return Err(LedgerError::PositionNotFound(id));
        };
        self.by_market.remove(&position.market_id);

        position.status = PositionStatus::Closed;
        position.current_price = exit_price;
        position.last_updated = closed_at;
        position.exit_price = Some(exit_price);
        position.exit_fee = Some(pnl.exit_fee);
        position.realized_pnl = Some(pnl.net_profit);
        position.closed_at = Some(closed_at);
        position.close_reason = Some(reason);

        info!(
            position_id = %id,
            market_id = %position.market_id,
            %exit_price,
            %reason,
            net_pnl = %pnl.net_profit,
            total_fees = %pnl.total_fees,
            "position closed"
        );

        self.closed.push(position);
        Ok(pnl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrailingStopConfig;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap()
    }

    fn ledger() -> PositionLedger {
        PositionLedger::new(FeeEngine::default(), ExitConfig::default()).unwrap()
    }

    // ===== Open =====

    #[test]
    fn open_charges_entry_fee() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();

        assert_eq!(position.id, PositionId(1));
        assert_eq!(position.entry_fee, dec!(1.68));
        assert_eq!(position.entry_cost, dec!(61.68));
        assert!(position.is_open());
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn short_position_pays_for_the_no_contract() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Short, dec!(0.70), 100, FeeKind::Taker, t0())
            .unwrap();

        // NO costs 0.30, fee is symmetric: 0.07 * 100 * 0.3 * 0.7 = 1.47
        assert_eq!(position.entry_cost, dec!(31.47));
    }

    #[test]
    fn second_open_on_same_market_is_duplicate() {
        let mut ledger = ledger();
        let first = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        let err = ledger
            .open("FED-DEC", Side::Short, dec!(0.40), 10, FeeKind::Maker, t0())
            .unwrap_err();

        assert_eq!(
            err,
            LedgerError::DuplicatePosition {
                market_id: "FED-DEC".to_string(),
                existing: first.id,
            }
        );
        assert_eq!(ledger.open_count(), 1);
    }

    #[test]
    fn market_can_reopen_after_close() {
        let mut ledger = ledger();
        let first = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        ledger
            .close(first.id, dec!(0.61), FeeKind::Taker, t0(), ExitReason::Manual)
            .unwrap();

        let second = ledger
            .open("FED-DEC", Side::Long, dec!(0.62), 100, FeeKind::Taker, t0())
            .unwrap();
        assert_eq!(second.id, PositionId(2));
    }

    #[test]
    fn zero_quantity_and_bad_price_are_rejected() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.open("A-1", Side::Long, dec!(0.5), 0, FeeKind::Taker, t0()),
            Err(LedgerError::ZeroQuantity)
        );
        assert!(matches!(
            ledger.open("A-1", Side::Long, dec!(1.2), 10, FeeKind::Taker, t0()),
            Err(LedgerError::Fee(FeeError::InvalidPrice { .. }))
        ));
        assert_eq!(ledger.open_count(), 0);
    }

    // ===== Exit Evaluation =====

    #[test]
    fn profit_target_on_net_dollars() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();

        // +2 cents gross is 2.00 before fees, a loss after them
        let decision = ledger
            .evaluate_exit(position.id, dec!(0.62), t0() + Duration::minutes(5))
            .unwrap();
        assert_eq!(decision.reason, None);
        assert!(decision.unrealized.net_profit < Decimal::ZERO);

        let decision = ledger
            .evaluate_exit(position.id, dec!(0.70), t0() + Duration::minutes(6))
            .unwrap();
        assert_eq!(decision.reason, Some(ExitReason::ProfitTarget));
        assert_eq!(decision.unrealized.net_profit, dec!(6.85));
        assert!(decision.should_exit());
    }

    #[test]
    fn stop_loss_on_net_dollars() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.50), 100, FeeKind::Taker, t0())
            .unwrap();

        // net at 0.50 is -3.50 (both fees), already past -1.50
        let decision = ledger.evaluate_exit(position.id, dec!(0.50), t0()).unwrap();
        assert_eq!(decision.reason, Some(ExitReason::StopLoss));
    }

    #[test]
    fn short_profits_when_price_falls() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Short, dec!(0.70), 100, FeeKind::Taker, t0())
            .unwrap();

        let decision = ledger.evaluate_exit(position.id, dec!(0.60), t0()).unwrap();
        // NO 0.30 -> 0.40: mirror of the 0.60 -> 0.70 long case after fees
        assert_eq!(decision.unrealized.entry_fee, dec!(1.47));
        assert_eq!(decision.unrealized.exit_fee, dec!(1.68));
        assert_eq!(decision.unrealized.net_profit, dec!(6.85));
        assert_eq!(decision.reason, Some(ExitReason::ProfitTarget));
    }

    #[test]
    fn time_limit_applies_after_max_hold() {
        let exits = ExitConfig::default().with_targets(dec!(100), dec!(-100));
        let mut ledger = PositionLedger::new(FeeEngine::default(), exits).unwrap();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();

        let early = ledger
            .evaluate_exit(position.id, dec!(0.60), t0() + Duration::minutes(59))
            .unwrap();
        assert_eq!(early.reason, None);

        let late = ledger
            .evaluate_exit(position.id, dec!(0.60), t0() + Duration::hours(1))
            .unwrap();
        assert_eq!(late.reason, Some(ExitReason::TimeLimit));
    }

    #[test]
    fn profit_target_outranks_time_limit() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        let decision = ledger
            .evaluate_exit(position.id, dec!(0.80), t0() + Duration::hours(5))
            .unwrap();
        assert_eq!(decision.reason, Some(ExitReason::ProfitTarget));
    }

    #[test]
    fn trailing_stop_fires_after_giveback() {
        let exits = ExitConfig::default()
            .with_targets(dec!(50), dec!(-20))
            .with_trailing_stop(TrailingStopConfig::default());
        let mut ledger = PositionLedger::new(FeeEngine::default(), exits).unwrap();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.40), 100, FeeKind::Taker, t0())
            .unwrap();

        // 0.40 -> 0.50: 50 - 1.75 - 41.68 = 6.57, arms the stop
        let peak = ledger.evaluate_exit(position.id, dec!(0.50), t0()).unwrap();
        assert_eq!(peak.reason, None);
        assert_eq!(ledger.get(position.id).unwrap().peak_net_pnl, dec!(6.57));

        // 0.47: 47 - 1.75 - 41.68 = 3.57, more than 2.50 below the peak
        let giveback = ledger.evaluate_exit(position.id, dec!(0.47), t0()).unwrap();
        assert_eq!(giveback.reason, Some(ExitReason::TrailingStop));
    }

    #[test]
    fn evaluate_updates_current_price() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        let later = t0() + Duration::seconds(30);
        ledger.evaluate_exit(position.id, dec!(0.61), later).unwrap();

        let stored = ledger.get(position.id).unwrap();
        assert_eq!(stored.current_price, dec!(0.61));
        assert_eq!(stored.last_updated, later);
    }

    #[test]
    fn evaluate_unknown_position_is_not_found() {
        let mut ledger = ledger();
        assert_eq!(
            ledger.evaluate_exit(PositionId(42), dec!(0.5), t0()),
            Err(LedgerError::PositionNotFound(PositionId(42)))
        );
    }

    // ===== Close =====

    #[test]
    fn close_returns_full_breakdown() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        let closed_at = t0() + Duration::minutes(20);
        let pnl = ledger
            .close(position.id, dec!(0.70), FeeKind::Taker, closed_at, ExitReason::ProfitTarget)
            .unwrap();

        assert_eq!(pnl.net_profit, dec!(6.85));
        assert_eq!(ledger.open_count(), 0);
        assert!(!ledger.has_open_position("FED-DEC"));

        let closed = &ledger.closed_positions()[0];
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.exit_fee, Some(dec!(1.47)));
        assert_eq!(closed.realized_pnl, Some(dec!(6.85)));
        assert_eq!(closed.close_reason, Some(ExitReason::ProfitTarget));
        assert_eq!(closed.holding_time(t0() + Duration::days(1)), Duration::minutes(20));
    }

    #[test]
    fn second_close_is_not_found() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        ledger
            .close(position.id, dec!(0.65), FeeKind::Taker, t0(), ExitReason::StopLoss)
            .unwrap();

        assert_eq!(
            ledger.close(position.id, dec!(0.65), FeeKind::Taker, t0(), ExitReason::Manual),
            Err(LedgerError::PositionNotFound(position.id))
        );
        assert_eq!(ledger.closed_positions().len(), 1);
    }

    #[test]
    fn close_with_bad_price_leaves_position_open() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        assert!(ledger
            .close(position.id, dec!(-0.1), FeeKind::Taker, t0(), ExitReason::Manual)
            .is_err());
        assert!(ledger.get(position.id).is_some());
    }

    #[test]
    fn liquidation_value_uses_last_price() {
        let mut ledger = ledger();
        let position = ledger
            .open("FED-DEC", Side::Long, dec!(0.60), 100, FeeKind::Taker, t0())
            .unwrap();
        ledger.evaluate_exit(position.id, dec!(0.70), t0()).unwrap();
        assert_eq!(ledger.open_liquidation_value(), dec!(68.53));
    }
}

//! Trading desk: the ledger and the risk coordinator behind one lock.
//!
//! The live bot runs two loops, one for signals and one for price updates.
//! Both go through a [`SharedDesk`], so opening, evaluating and closing a
//! position never interleave.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::{
    ExitDecision, ExitReason, FeeKind, LedgerError, MarketTick, PnLResult, Position, PositionId,
    PositionLedger, TradeCandidate,
};
use std::sync::Arc;
use tracing::{info, warn};

use crate::check::RiskCheckResult;
use crate::coordinator::{RiskCoordinator, RiskSummary};

/// Desk shared by the signal loop and the price loop.
pub type SharedDesk = Arc<Mutex<TradingDesk>>;

/// Result of an executed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub position: Position,
    /// Post-fill slippage check. A rejection means the caller should unwind.
    pub slippage: RiskCheckResult,
}

impl FillReport {
    #[must_use]
    pub fn should_unwind(&self) -> bool {
        self.slippage.is_rejected()
    }
}

/// Outcome of [`TradingDesk::close_position`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CloseOutcome {
    Closed { pnl: PnLResult },
    /// Another caller closed it first; treat as success.
    AlreadyClosed,
}

#[derive(Debug)]
pub struct TradingDesk {
    ledger: PositionLedger,
    risk: RiskCoordinator,
}

impl TradingDesk {
    #[must_use]
    pub fn new(ledger: PositionLedger, risk: RiskCoordinator) -> Self {
        Self { ledger, risk }
    }

    #[must_use]
    pub fn into_shared(self) -> SharedDesk {
        Arc::new(Mutex::new(self))
    }

    #[must_use]
    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    #[must_use]
    pub fn risk(&self) -> &RiskCoordinator {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskCoordinator {
        &mut self.risk
    }

    /// Pre-trade checks for a candidate against the current book.
    pub fn submit_candidate(
        &mut self,
        candidate: &TradeCandidate,
        reported_balance: Decimal,
        now: DateTime<Utc>,
    ) -> RiskCheckResult {
        self.risk
            .can_trade_pre_submission(candidate, &self.ledger, reported_balance, now)
    }

    /// Books an executed entry and validates its slippage.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] if the ledger refuses the position; nothing
    /// is counted toward the daily trade limit in that case.
    pub fn open_position(
        &mut self,
        candidate: &TradeCandidate,
        fill_price: Decimal,
        fee_kind: FeeKind,
        now: DateTime<Utc>,
    ) -> Result<FillReport, LedgerError> {
        let position = self.ledger.open(
            &candidate.market_id,
            candidate.side,
            fill_price,
            candidate.quantity,
            fee_kind,
            now,
        )?;
        self.risk.record_entry(now);

        let slippage = self.risk.validate_fill(
            candidate.price,
            fill_price,
            candidate.side.entry_order(),
            candidate.quantity,
            &candidate.market_id,
            now,
        );
        if slippage.is_rejected() {
            warn!(position_id = %position.id, market_id = %candidate.market_id, "entry fill needs unwinding");
        }

        Ok(FillReport { position, slippage })
    }

    /// Evaluates the open position on the tick's market, if any.
    ///
    /// Returns the decisions that call for an exit.
    pub fn on_market_update(&mut self, tick: &MarketTick) -> Vec<ExitDecision> {
        let Some(id) = self
            .ledger
            .position_for_market(&tick.market_id)
            .map(|position| position.id)
        else {
            return Vec::new();
        };

        match self.ledger.evaluate_exit(id, tick.price, tick.timestamp) {
            Ok(decision) if decision.should_exit() => vec![decision],
            Ok(_) => Vec::new(),
            Err(err) => {
                warn!(market_id = %tick.market_id, price = %tick.price, %err, "tick could not be evaluated");
                Vec::new()
            }
        }
    }

    /// Closes a position and books the result with the coordinator.
    ///
    /// # Errors
    ///
    /// Returns a [`LedgerError`] for an invalid exit price. A position that
    /// is already closed yields [`CloseOutcome::AlreadyClosed`].
    pub fn close_position(
        &mut self,
        id: PositionId,
        exit_price: Decimal,
        fee_kind: FeeKind,
        closed_at: DateTime<Utc>,
        reason: ExitReason,
    ) -> Result<CloseOutcome, LedgerError> {
        match self.ledger.close(id, exit_price, fee_kind, closed_at, reason) {
            Ok(pnl) => {
                self.risk.record_exit(id, &pnl, closed_at);
                Ok(CloseOutcome::Closed { pnl })
            }
            Err(LedgerError::PositionNotFound(_)) => {
                info!(position_id = %id, "position already closed");
                Ok(CloseOutcome::AlreadyClosed)
            }
            Err(err) => Err(err),
        }
    }

    #[must_use]
    pub fn risk_summary(&self, now: DateTime<Utc>) -> RiskSummary {
        self.risk.get_risk_summary(now)
    }
}

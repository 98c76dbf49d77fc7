//! Risk coordinator.
//!
//! Single entry point for trade decisions. Runs the monitors in a fixed
//! order and surfaces the first rejection unchanged:
//!
//! 1. account status
//! 2. daily loss limit
//! 3. event-group correlation
//! 4. existing position on the market
//! 5. price band
//! 6. market liquidity
//! 7. concurrent positions
//! 8. trades per day
//! 9. settlement-aware balance
//!
//! Daily loss is measured on account equity: reported cash plus open
//! positions at their liquidation value.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::{
    ConfigError, FeeKind, OrderSide, PnLResult, PositionId, PositionLedger, RiskConfig,
    TradeCandidate,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::account::{AccountSnapshot, AccountStatus, AccountStatusMonitor};
use crate::check::{ReasonCode, RiskCheckResult};
use crate::correlation::CorrelationManager;
use crate::daily_loss::{DailyLossCheck, DailyLossLimit};
use crate::settlement::{SettlementSnapshot, SettlementTracker};
use crate::slippage::{SlippageMonitor, SlippageStats};

/// Per-session trading state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DailyRiskState {
    pub starting_balance: Decimal,
    /// Equity seen by the most recent pre-trade check.
    pub current_balance: Decimal,
    pub trades_count: u32,
    pub consecutive_losses: u32,
    pub last_reset_date: Option<NaiveDate>,
    pub realized_pnl: Decimal,
}

/// Read-only view of every monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSummary {
    pub trading_allowed: bool,
    pub account: AccountSnapshot,
    pub daily: DailyRiskState,
    pub daily_loss: DailyLossCheck,
    pub slippage: SlippageStats,
    pub settlement: SettlementSnapshot,
    pub checks_passed: u64,
    pub checks_failed: BTreeMap<ReasonCode, u64>,
    pub limits: RiskConfig,
}

#[derive(Debug)]
pub struct RiskCoordinator {
    config: RiskConfig,
    account: AccountStatusMonitor,
    daily_loss: DailyLossLimit,
    slippage: SlippageMonitor,
    settlement: SettlementTracker,
    correlation: CorrelationManager,
    daily: DailyRiskState,
    checks_passed: u64,
    checks_failed: BTreeMap<ReasonCode, u64>,
}

impl RiskCoordinator {
    /// Builds the coordinator and every monitor from one validated config.
    ///
    /// # Errors
    ///
    /// Returns an error if any limit is out of range.
    pub fn new(config: RiskConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            account: AccountStatusMonitor::new(&config),
            daily_loss: DailyLossLimit::new(config.max_daily_loss_pct),
            slippage: SlippageMonitor::new(config.max_slippage_tolerance),
            settlement: SettlementTracker::new(config.settlement_business_days),
            correlation: CorrelationManager::new(&config),
            daily: DailyRiskState::default(),
            checks_passed: 0,
            checks_failed: BTreeMap::new(),
            config,
        })
    }

    /// Replaces the correlation manager, e.g. to use a custom event grouper.
    #[must_use]
    pub fn with_correlation(mut self, correlation: CorrelationManager) -> Self {
        self.correlation = correlation;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    #[must_use]
    pub fn daily_state(&self) -> &DailyRiskState {
        &self.daily
    }

    #[must_use]
    pub fn correlation(&self) -> &CorrelationManager {
        &self.correlation
    }

    #[must_use]
    pub fn settlement(&self) -> &SettlementTracker {
        &self.settlement
    }

    /// Starts a trading session for the calendar day of `now`.
    ///
    /// Returns `false` without changing anything when the day was already
    /// initialized.
    pub fn initialize_daily(&mut self, starting_balance: Decimal, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if self.daily.last_reset_date == Some(today) {
            return false;
        }

        self.daily_loss.initialize_daily(starting_balance, today);
        let released = self.settlement.release_settled(now);
        self.daily = DailyRiskState {
            starting_balance,
            current_balance: starting_balance,
            last_reset_date: Some(today),
            ..DailyRiskState::default()
        };

        info!(%today, %starting_balance, %released, "daily risk session started");
        true
    }

    /// Runs every pre-trade check against `candidate`.
    ///
    /// `reported_balance` is the cash balance reported by the exchange; open
    /// positions are read from `ledger`.
    pub fn can_trade_pre_submission(
        &mut self,
        candidate: &TradeCandidate,
        ledger: &PositionLedger,
        reported_balance: Decimal,
        now: DateTime<Utc>,
    ) -> RiskCheckResult {
        let result = self.evaluate(candidate, ledger, reported_balance, now);
        self.tally(candidate, &result);
        result
    }

    fn evaluate(
        &mut self,
        candidate: &TradeCandidate,
        ledger: &PositionLedger,
        reported_balance: Decimal,
        now: DateTime<Utc>,
    ) -> RiskCheckResult {
        let config = &self.config;

        // 1. account
        self.account.refresh(now);
        if let AccountStatus::Suspended { until, cause } = self.account.status(now) {
            return RiskCheckResult::reject(ReasonCode::AccountSuspended)
                .with_detail("until", until)
                .with_detail("cause", cause);
        }

        // 2. daily loss
        let equity = reported_balance + ledger.open_liquidation_value();
        self.daily.current_balance = equity;
        let daily = self.daily_loss.check_daily_loss(equity);
        if daily.exceeded {
            return RiskCheckResult::reject(ReasonCode::DailyLossLimitExceeded)
                .with_detail("starting_balance", daily.starting_balance)
                .with_detail("current_balance", daily.current_balance)
                .with_detail("loss_amount", daily.loss_amount)
                .with_detail("loss_pct", daily.loss_pct)
                .with_detail("max_loss_pct", daily.max_loss_pct);
        }

        // 3. correlation
        let cost = match ledger.fees().entry_cost(
            candidate.quantity,
            candidate.contract_price(),
            FeeKind::Taker,
        ) {
            Ok(cost) => cost,
            Err(err) => {
                return RiskCheckResult::reject(ReasonCode::PriceOutOfRange)
                    .with_detail("price", candidate.price)
                    .with_detail("error", err.to_string());
            }
        };
        let correlation =
            self.correlation
                .check_exposure(&candidate.market_id, cost.total, ledger.open_positions());
        if correlation.is_rejected() {
            return correlation;
        }

        // 4. existing position
        if let Some(existing) = ledger.position_for_market(&candidate.market_id) {
            return RiskCheckResult::reject(ReasonCode::ExistingPosition)
                .with_detail("market_id", &candidate.market_id)
                .with_detail("position_id", existing.id)
                .with_detail("side", existing.side);
        }

        // 5. price band
        if candidate.price < config.valid_price_min || candidate.price > config.valid_price_max {
            return RiskCheckResult::reject(ReasonCode::PriceOutOfRange)
                .with_detail("price", candidate.price)
                .with_detail("valid_price_min", config.valid_price_min)
                .with_detail("valid_price_max", config.valid_price_max);
        }

        // 6. liquidity, unknown liquidity passes
        if let Some(liquidity) = candidate.liquidity {
            if liquidity < config.min_liquidity {
                return RiskCheckResult::reject(ReasonCode::InsufficientLiquidity)
                    .with_detail("liquidity", liquidity)
                    .with_detail("min_liquidity", config.min_liquidity);
            }
        }

        // 7. concurrent positions
        let open_count = ledger.open_count();
        if open_count >= config.max_concurrent_positions {
            return RiskCheckResult::reject(ReasonCode::MaxConcurrentPositions)
                .with_detail("open_positions", open_count)
                .with_detail("max_concurrent_positions", config.max_concurrent_positions);
        }

        // 8. trades per day
        if self.daily.trades_count >= config.max_daily_trades {
            return RiskCheckResult::reject(ReasonCode::MaxDailyTrades)
                .with_detail("trades_today", self.daily.trades_count)
                .with_detail("max_daily_trades", config.max_daily_trades);
        }

        // 9. balance
        let available = self.settlement.available_balance(reported_balance, now);
        let spendable = available - config.min_account_balance;
        if cost.total > spendable {
            return RiskCheckResult::reject(ReasonCode::InsufficientBalance)
                .with_detail("required", cost.total)
                .with_detail("reported_balance", reported_balance)
                .with_detail("available_balance", available)
                .with_detail("unsettled", self.settlement.pending_amount(now))
                .with_detail("min_account_balance", config.min_account_balance);
        }

        RiskCheckResult::pass()
            .with_detail("entry_cost", cost.total)
            .with_detail("entry_fee", cost.fee)
    }

    fn tally(&mut self, candidate: &TradeCandidate, result: &RiskCheckResult) {
        match result.reason {
            None => {
                self.checks_passed += 1;
                debug!(
                    market_id = %candidate.market_id,
                    side = %candidate.side,
                    price = %candidate.price,
                    quantity = candidate.quantity,
                    "pre-trade checks passed"
                );
            }
            Some(reason) => {
                *self.checks_failed.entry(reason).or_insert(0) += 1;
                warn!(
                    market_id = %candidate.market_id,
                    side = %candidate.side,
                    price = %candidate.price,
                    %reason,
                    details = ?result.details,
                    "trade rejected"
                );
            }
        }
    }

    /// Validates an executed fill against the slippage tolerance.
    pub fn validate_fill(
        &mut self,
        requested_price: Decimal,
        actual_price: Decimal,
        side: OrderSide,
        quantity: u32,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> RiskCheckResult {
        let result = self
            .slippage
            .validate_fill(requested_price, actual_price, side, quantity, market_id, now);
        match result.reason {
            None => self.checks_passed += 1,
            Some(reason) => *self.checks_failed.entry(reason).or_insert(0) += 1,
        }
        result
    }

    /// Records a terminal API failure; returns whether trading is suspended.
    pub fn handle_api_error(&mut self, status_code: u16, message: &str, now: DateTime<Utc>) -> bool {
        self.account.on_api_error(status_code, message, now)
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.account.record_success(now);
    }

    /// Lifts an account suspension immediately.
    pub fn clear_suspension(&mut self) {
        self.account.clear();
    }

    #[must_use]
    pub fn is_trading_allowed(&self, now: DateTime<Utc>) -> bool {
        self.account.is_trading_allowed(now) && !self.daily_loss.is_tripped()
    }

    /// Counts an executed entry toward the daily trade limit.
    pub fn record_entry(&mut self, now: DateTime<Utc>) {
        self.daily.trades_count += 1;
        debug!(trades_today = self.daily.trades_count, at = %now, "entry recorded");
    }

    /// Books a closed position: realized P&L, loss streak, and unsettled proceeds.
    pub fn record_exit(&mut self, position_id: PositionId, pnl: &PnLResult, closed_at: DateTime<Utc>) {
        self.daily.realized_pnl += pnl.net_profit;
        if pnl.net_profit < Decimal::ZERO {
            self.daily.consecutive_losses += 1;
        } else {
            self.daily.consecutive_losses = 0;
        }
        self.settlement.track(position_id, pnl.exit_revenue, closed_at);
    }

    /// Cash that may be committed to new trades.
    #[must_use]
    pub fn available_balance(&self, reported_balance: Decimal, now: DateTime<Utc>) -> Decimal {
        self.settlement.available_balance(reported_balance, now)
    }

    #[must_use]
    pub fn get_risk_summary(&self, now: DateTime<Utc>) -> RiskSummary {
        RiskSummary {
            trading_allowed: self.is_trading_allowed(now),
            account: self.account.snapshot(now),
            daily: self.daily.clone(),
            daily_loss: self.daily_loss.evaluate(self.daily.current_balance),
            slippage: self.slippage.stats(),
            settlement: self.settlement.snapshot(now),
            checks_passed: self.checks_passed,
            checks_failed: self.checks_failed.clone(),
            limits: self.config.clone(),
        }
    }
}

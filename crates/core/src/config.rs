//! Bot configuration.
//!
//! Every section carries the production defaults and a `validate` method.
//! Components call `validate` in their constructors, so an invalid value is
//! rejected when the component is built rather than discovered mid-run.

use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fees::{FeeKind, FeeKinds, MAKER_FEE_MULTIPLIER, TAKER_FEE_MULTIPLIER};

/// A configuration value outside its allowed range.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

fn ensure(condition: bool, field: &'static str, reason: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, reason))
    }
}

/// Converts a configured number of seconds into a chrono duration.
#[must_use]
pub fn duration_from_secs(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

/// Upper bound for any configured duration (30 days).
const MAX_CONFIGURED_SECS: u64 = 30 * 24 * 60 * 60;

// =============================================================================
// Top Level
// =============================================================================

/// Complete bot configuration, one section per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub fees: FeeConfig,
    pub exits: ExitConfig,
    pub risk: RiskConfig,
    pub spike: SpikeConfig,
    pub backtest: BacktestConfig,
}

impl BotConfig {
    /// Validates every section.
    ///
    /// # Errors
    ///
    /// Returns the first invalid value found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fees.validate()?;
        self.exits.validate()?;
        self.risk.validate()?;
        self.spike.validate()?;
        self.backtest.validate()
    }
}

// =============================================================================
// Fees
// =============================================================================

/// Fee multipliers and root-finding parameters for the fee engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    /// Multiplier applied to orders that remove liquidity.
    pub taker_multiplier: Decimal,
    /// Multiplier applied to resting orders.
    pub maker_multiplier: Decimal,
    /// Price precision at which the exit-price solvers stop.
    pub solver_epsilon: Decimal,
    /// Iteration cap for the exit-price solvers.
    pub solver_max_iterations: u32,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            taker_multiplier: TAKER_FEE_MULTIPLIER,
            maker_multiplier: MAKER_FEE_MULTIPLIER,
            solver_epsilon: dec!(0.0001),
            solver_max_iterations: 100,
        }
    }
}

impl FeeConfig {
    #[must_use]
    pub fn with_solver(mut self, epsilon: Decimal, max_iterations: u32) -> Self {
        self.solver_epsilon = epsilon;
        self.solver_max_iterations = max_iterations;
        self
    }

    /// # Errors
    ///
    /// Returns an error for negative multipliers or an unusable solver setup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.taker_multiplier >= Decimal::ZERO && self.taker_multiplier <= Decimal::ONE,
            "fees.taker_multiplier",
            "must be within [0, 1]",
        )?;
        ensure(
            self.maker_multiplier >= Decimal::ZERO && self.maker_multiplier <= Decimal::ONE,
            "fees.maker_multiplier",
            "must be within [0, 1]",
        )?;
        ensure(
            self.solver_epsilon >= dec!(0.00000001) && self.solver_epsilon <= dec!(0.1),
            "fees.solver_epsilon",
            "must be within [1e-8, 0.1]",
        )?;
        ensure(
            self.solver_max_iterations > 0,
            "fees.solver_max_iterations",
            "must be positive",
        )
    }
}

// =============================================================================
// Exits
// =============================================================================

/// Trailing stop on fee-adjusted P&L.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopConfig {
    /// Peak net P&L that arms the stop.
    pub activation_usd: Decimal,
    /// Give-back from the peak that triggers the exit.
    pub distance_usd: Decimal,
}

impl Default for TrailingStopConfig {
    fn default() -> Self {
        Self {
            activation_usd: dec!(5.00),
            distance_usd: dec!(2.50),
        }
    }
}

/// Dollar-denominated exit thresholds for open positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    /// Net P&L at or above which the position is closed.
    pub target_profit_usd: Decimal,
    /// Net P&L at or below which the position is closed (negative).
    pub stop_loss_usd: Decimal,
    /// Maximum holding time in seconds.
    pub max_hold_secs: u64,
    pub trailing_stop: Option<TrailingStopConfig>,
    /// Fee kind assumed when valuing an exit.
    pub exit_fee_kind: FeeKind,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            target_profit_usd: dec!(2.00),
            stop_loss_usd: dec!(-1.50),
            max_hold_secs: 3600,
            trailing_stop: None,
            exit_fee_kind: FeeKind::Taker,
        }
    }
}

impl ExitConfig {
    #[must_use]
    pub fn with_targets(mut self, target_profit_usd: Decimal, stop_loss_usd: Decimal) -> Self {
        self.target_profit_usd = target_profit_usd;
        self.stop_loss_usd = stop_loss_usd;
        self
    }

    #[must_use]
    pub fn with_max_hold_secs(mut self, secs: u64) -> Self {
        self.max_hold_secs = secs;
        self
    }

    #[must_use]
    pub fn with_trailing_stop(mut self, trailing_stop: TrailingStopConfig) -> Self {
        self.trailing_stop = Some(trailing_stop);
        self
    }

    #[must_use]
    pub fn max_hold(&self) -> Duration {
        duration_from_secs(self.max_hold_secs)
    }

    /// # Errors
    ///
    /// Returns an error when the thresholds do not bracket zero or the hold
    /// time is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.target_profit_usd > Decimal::ZERO,
            "exits.target_profit_usd",
            "must be positive",
        )?;
        ensure(
            self.stop_loss_usd < Decimal::ZERO,
            "exits.stop_loss_usd",
            "must be negative",
        )?;
        ensure(
            self.max_hold_secs > 0 && self.max_hold_secs <= MAX_CONFIGURED_SECS,
            "exits.max_hold_secs",
            "must be within (0, 30 days]",
        )?;
        if let Some(trailing) = &self.trailing_stop {
            ensure(
                trailing.activation_usd > Decimal::ZERO,
                "exits.trailing_stop.activation_usd",
                "must be positive",
            )?;
            ensure(
                trailing.distance_usd > Decimal::ZERO,
                "exits.trailing_stop.distance_usd",
                "must be positive",
            )?;
        }
        Ok(())
    }
}

// =============================================================================
// Risk
// =============================================================================

/// Limits enforced by the risk monitors and the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of the day's starting balance that may be lost.
    pub max_daily_loss_pct: Decimal,
    /// Maximum relative fill slippage.
    pub max_slippage_tolerance: Decimal,
    /// Maximum open cost per correlated event group.
    pub max_event_exposure: Decimal,
    /// Ticker prefixes whose event group spans two tokens (`KX-FED-...`).
    pub multi_token_prefixes: Vec<String>,
    /// API status codes that suspend trading immediately.
    pub suspension_status_codes: Vec<u16>,
    /// How long a suspension lasts before trading resumes on its own.
    pub suspension_cooldown_secs: u64,
    /// Other API errors tolerated before suspending.
    pub api_error_threshold: u32,
    /// Error-free time after which the error count resets.
    pub error_recovery_secs: u64,
    /// Business days before exit proceeds are spendable.
    pub settlement_business_days: u32,
    pub max_concurrent_positions: usize,
    pub max_daily_trades: u32,
    /// Minimum market liquidity in dollars.
    pub min_liquidity: Decimal,
    pub valid_price_min: Decimal,
    pub valid_price_max: Decimal,
    /// Spendable balance that must remain after a trade.
    pub min_account_balance: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: dec!(0.15),
            max_slippage_tolerance: dec!(0.025),
            max_event_exposure: dec!(200),
            multi_token_prefixes: vec!["KX".to_string()],
            suspension_status_codes: vec![401, 403],
            suspension_cooldown_secs: 15 * 60,
            api_error_threshold: 5,
            error_recovery_secs: 300,
            settlement_business_days: 2,
            max_concurrent_positions: 3,
            max_daily_trades: 20,
            min_liquidity: dec!(200),
            valid_price_min: dec!(0.05),
            valid_price_max: dec!(0.95),
            min_account_balance: dec!(100),
        }
    }
}

impl RiskConfig {
    /// Tighter limits for a first live run with a small account.
    ///
    /// - Max daily loss: 5%
    /// - Max slippage: 1%
    /// - Max event exposure: $50
    /// - One open position, ten trades per day
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            max_daily_loss_pct: dec!(0.05),
            max_slippage_tolerance: dec!(0.01),
            max_event_exposure: dec!(50),
            max_concurrent_positions: 1,
            max_daily_trades: 10,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_daily_loss_pct(mut self, pct: Decimal) -> Self {
        self.max_daily_loss_pct = pct;
        self
    }

    #[must_use]
    pub fn with_max_event_exposure(mut self, exposure: Decimal) -> Self {
        self.max_event_exposure = exposure;
        self
    }

    #[must_use]
    pub fn with_max_concurrent_positions(mut self, max: usize) -> Self {
        self.max_concurrent_positions = max;
        self
    }

    #[must_use]
    pub fn with_max_daily_trades(mut self, max: u32) -> Self {
        self.max_daily_trades = max;
        self
    }

    #[must_use]
    pub fn with_min_liquidity(mut self, liquidity: Decimal) -> Self {
        self.min_liquidity = liquidity;
        self
    }

    #[must_use]
    pub fn with_min_account_balance(mut self, balance: Decimal) -> Self {
        self.min_account_balance = balance;
        self
    }

    #[must_use]
    pub fn with_settlement_business_days(mut self, days: u32) -> Self {
        self.settlement_business_days = days;
        self
    }

    #[must_use]
    pub fn suspension_cooldown(&self) -> Duration {
        duration_from_secs(self.suspension_cooldown_secs)
    }

    #[must_use]
    pub fn error_recovery_window(&self) -> Duration {
        duration_from_secs(self.error_recovery_secs)
    }

    /// # Errors
    ///
    /// Returns the first limit outside its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.max_daily_loss_pct > Decimal::ZERO && self.max_daily_loss_pct <= Decimal::ONE,
            "risk.max_daily_loss_pct",
            "must be within (0, 1]",
        )?;
        ensure(
            self.max_slippage_tolerance >= Decimal::ZERO && self.max_slippage_tolerance < Decimal::ONE,
            "risk.max_slippage_tolerance",
            "must be within [0, 1)",
        )?;
        ensure(
            self.max_event_exposure > Decimal::ZERO,
            "risk.max_event_exposure",
            "must be positive",
        )?;
        ensure(
            self.suspension_cooldown_secs > 0 && self.suspension_cooldown_secs <= MAX_CONFIGURED_SECS,
            "risk.suspension_cooldown_secs",
            "must be within (0, 30 days]",
        )?;
        ensure(
            self.api_error_threshold > 0,
            "risk.api_error_threshold",
            "must be positive",
        )?;
        ensure(
            self.error_recovery_secs <= MAX_CONFIGURED_SECS,
            "risk.error_recovery_secs",
            "must be at most 30 days",
        )?;
        ensure(
            self.settlement_business_days <= 10,
            "risk.settlement_business_days",
            "must be at most 10",
        )?;
        ensure(
            self.max_concurrent_positions > 0,
            "risk.max_concurrent_positions",
            "must be positive",
        )?;
        ensure(
            self.max_daily_trades > 0,
            "risk.max_daily_trades",
            "must be positive",
        )?;
        ensure(
            self.min_liquidity >= Decimal::ZERO,
            "risk.min_liquidity",
            "must not be negative",
        )?;
        ensure(
            self.valid_price_min >= Decimal::ZERO
                && self.valid_price_max <= Decimal::ONE
                && self.valid_price_min < self.valid_price_max,
            "risk.valid_price_min",
            "price band must satisfy 0 <= min < max <= 1",
        )?;
        ensure(
            self.min_account_balance >= Decimal::ZERO,
            "risk.min_account_balance",
            "must not be negative",
        )
    }
}

// =============================================================================
// Spike Detection
// =============================================================================

/// Parameters of the reference spike detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpikeConfig {
    /// Relative move between consecutive samples that counts as a spike.
    pub spike_threshold: Decimal,
    /// Moves larger than this are treated as bad ticks and ignored.
    pub max_spike_pct: Decimal,
    /// Seconds after a signal during which the same market stays quiet.
    pub cooldown_secs: u64,
}

impl Default for SpikeConfig {
    fn default() -> Self {
        Self {
            spike_threshold: dec!(0.04),
            max_spike_pct: dec!(0.30),
            cooldown_secs: 10,
        }
    }
}

impl SpikeConfig {
    #[must_use]
    pub fn with_spike_threshold(mut self, threshold: Decimal) -> Self {
        self.spike_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_cooldown_secs(mut self, secs: u64) -> Self {
        self.cooldown_secs = secs;
        self
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        duration_from_secs(self.cooldown_secs)
    }

    /// # Errors
    ///
    /// Returns an error for a non-positive threshold or a suspicious-move cap
    /// below the threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.spike_threshold > Decimal::ZERO,
            "spike.spike_threshold",
            "must be positive",
        )?;
        ensure(
            self.max_spike_pct > self.spike_threshold,
            "spike.max_spike_pct",
            "must exceed spike_threshold",
        )?;
        ensure(
            self.cooldown_secs <= MAX_CONFIGURED_SECS,
            "spike.cooldown_secs",
            "must be at most 30 days",
        )
    }
}

// =============================================================================
// Backtest
// =============================================================================

/// Parameters of a historical replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub starting_balance: Decimal,
    /// Fixed contracts per entry.
    pub contracts_per_trade: u32,
    /// Number of events between equity-curve samples.
    pub equity_sample_interval: usize,
    pub fee_kinds: FeeKinds,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            starting_balance: dec!(10000),
            contracts_per_trade: 100,
            equity_sample_interval: 100,
            fee_kinds: FeeKinds::TAKER,
        }
    }
}

impl BacktestConfig {
    #[must_use]
    pub fn with_starting_balance(mut self, balance: Decimal) -> Self {
        self.starting_balance = balance;
        self
    }

    #[must_use]
    pub fn with_contracts_per_trade(mut self, contracts: u32) -> Self {
        self.contracts_per_trade = contracts;
        self
    }

    #[must_use]
    pub fn with_equity_sample_interval(mut self, interval: usize) -> Self {
        self.equity_sample_interval = interval;
        self
    }

    #[must_use]
    pub fn with_fee_kinds(mut self, fee_kinds: FeeKinds) -> Self {
        self.fee_kinds = fee_kinds;
        self
    }

    /// # Errors
    ///
    /// Returns an error for a non-positive balance, zero sizing or a zero
    /// sampling interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.starting_balance > Decimal::ZERO,
            "backtest.starting_balance",
            "must be positive",
        )?;
        ensure(
            self.contracts_per_trade > 0,
            "backtest.contracts_per_trade",
            "must be positive",
        )?;
        ensure(
            self.equity_sample_interval > 0,
            "backtest.equity_sample_interval",
            "must be positive",
        )
    }
}

//! Layered risk engine for the spikebot trader.
//!
//! This crate provides:
//! - Independent monitors for account status, daily loss, fill slippage,
//!   unsettled proceeds and correlated event exposure
//! - [`RiskCoordinator`], which runs the monitors in a fixed order and
//!   reports the first rejection as a [`RiskCheckResult`]
//! - [`TradingDesk`], the ledger and coordinator behind one lock for the
//!   live signal and price loops
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use spikebot_core::{ExitConfig, FeeEngine, PositionLedger, RiskConfig, Side, TradeCandidate};
//! use spikebot_risk::RiskCoordinator;
//!
//! let ledger = PositionLedger::new(FeeEngine::default(), ExitConfig::default()).unwrap();
//! let mut risk = RiskCoordinator::new(RiskConfig::default()).unwrap();
//! let now = Utc::now();
//! risk.initialize_daily(dec!(1000), now);
//!
//! let candidate = TradeCandidate::new("FED-DEC", Side::Long, dec!(0.50), 10);
//! let result = risk.can_trade_pre_submission(&candidate, &ledger, dec!(1000), now);
//! assert!(result.passed);
//! ```

pub mod account;
pub mod check;
pub mod coordinator;
pub mod correlation;
pub mod daily_loss;
pub mod desk;
pub mod settlement;
pub mod slippage;

pub use account::{AccountSnapshot, AccountStatus, AccountStatusMonitor, ApiErrorClass};
pub use check::{ReasonCode, RiskCheckResult};
pub use coordinator::{DailyRiskState, RiskCoordinator, RiskSummary};
pub use correlation::{CorrelationManager, EventGrouper, TickerPrefixGrouper};
pub use daily_loss::{DailyLossCheck, DailyLossLimit};
pub use desk::{CloseOutcome, FillReport, SharedDesk, TradingDesk};
pub use settlement::{PendingSettlement, SettlementSnapshot, SettlementTracker};
pub use slippage::{SlippageEvent, SlippageMonitor, SlippageStats};

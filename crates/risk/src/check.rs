//! Typed outcome of every risk check.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Why a check rejected a trade or fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    AccountSuspended,
    DailyLossLimitExceeded,
    CorrelationLimit,
    ExistingPosition,
    PriceOutOfRange,
    InsufficientLiquidity,
    MaxConcurrentPositions,
    MaxDailyTrades,
    InsufficientBalance,
    SlippageExceeded,
    InvalidFillPrice,
}

impl ReasonCode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccountSuspended => "account_suspended",
            Self::DailyLossLimitExceeded => "daily_loss_limit_exceeded",
            Self::CorrelationLimit => "correlation_limit",
            Self::ExistingPosition => "existing_position",
            Self::PriceOutOfRange => "price_out_of_range",
            Self::InsufficientLiquidity => "insufficient_liquidity",
            Self::MaxConcurrentPositions => "max_concurrent_positions",
            Self::MaxDailyTrades => "max_daily_trades",
            Self::InsufficientBalance => "insufficient_balance",
            Self::SlippageExceeded => "slippage_exceeded",
            Self::InvalidFillPrice => "invalid_fill_price",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a risk check. A rejection is an ordinary value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheckResult {
    pub passed: bool,
    pub reason: Option<ReasonCode>,
    pub details: BTreeMap<String, Value>,
}

impl RiskCheckResult {
    #[must_use]
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            details: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn reject(reason: ReasonCode) -> Self {
        Self {
            passed: false,
            reason: Some(reason),
            details: BTreeMap::new(),
        }
    }

    /// Adds a detail entry. Values that fail to serialize are stored as null.
    #[must_use]
    pub fn with_detail(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.details.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_rejected(&self) -> bool {
        !self.passed
    }
}

//! Post-fill slippage validation.
//!
//! Fills cannot be previewed exactly before submission, so this check runs
//! after execution. A rejection tells the caller to unwind the position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::OrderSide;
use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::check::{ReasonCode, RiskCheckResult};

/// Number of fills kept in the event log.
const EVENT_LOG_CAPACITY: usize = 1_000;

/// One validated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageEvent {
    pub market_id: String,
    pub side: OrderSide,
    pub quantity: u32,
    pub requested_price: Decimal,
    pub actual_price: Decimal,
    /// `|actual - requested| / requested`
    pub slippage: Decimal,
    /// Signed slippage, positive when the fill was worse for us.
    pub adverse_slippage: Decimal,
    pub accepted: bool,
    pub at: DateTime<Utc>,
}

/// Running fill statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlippageStats {
    pub fills: u64,
    pub rejections: u64,
    pub avg_slippage: Decimal,
    pub max_slippage: Decimal,
}

#[derive(Debug, Clone)]
pub struct SlippageMonitor {
    max_tolerance: Decimal,
    events: VecDeque<SlippageEvent>,
    fills: u64,
    rejections: u64,
    total_slippage: Decimal,
    max_slippage: Decimal,
}

impl SlippageMonitor {
    #[must_use]
    pub fn new(max_tolerance: Decimal) -> Self {
        Self {
            max_tolerance,
            events: VecDeque::new(),
            fills: 0,
            rejections: 0,
            total_slippage: Decimal::ZERO,
            max_slippage: Decimal::ZERO,
        }
    }

    /// Relative distance between requested and actual price.
    ///
    /// Returns `None` for a non-positive requested price.
    #[must_use]
    pub fn measure(requested_price: Decimal, actual_price: Decimal) -> Option<Decimal> {
        if requested_price <= Decimal::ZERO {
            return None;
        }
        Some((actual_price - requested_price).abs() / requested_price)
    }

    /// Signed slippage: buying higher or selling lower is positive.
    #[must_use]
    pub fn adverse(requested_price: Decimal, actual_price: Decimal, side: OrderSide) -> Option<Decimal> {
        if requested_price <= Decimal::ZERO {
            return None;
        }
        let diff = match side {
            OrderSide::Buy => actual_price - requested_price,
            OrderSide::Sell => requested_price - actual_price,
        };
        Some(diff / requested_price)
    }

    /// Validates an executed fill against the tolerance.
    pub fn validate_fill(
        &mut self,
        requested_price: Decimal,
        actual_price: Decimal,
        side: OrderSide,
        quantity: u32,
        market_id: &str,
        now: DateTime<Utc>,
    ) -> RiskCheckResult {
        let valid_actual = actual_price >= Decimal::ZERO && actual_price <= Decimal::ONE;
        let (Some(slippage), Some(adverse_slippage), true) = (
            Self::measure(requested_price, actual_price),
            Self::adverse(requested_price, actual_price, side),
            valid_actual,
        ) else {
            warn!(market_id, %requested_price, %actual_price, "fill prices cannot be compared");
            return RiskCheckResult::reject(ReasonCode::InvalidFillPrice)
                .with_detail("market_id", market_id)
                .with_detail("requested_price", requested_price)
                .with_detail("actual_price", actual_price);
        };

        let accepted = slippage <= self.max_tolerance;
        self.record(SlippageEvent {
            market_id: market_id.to_string(),
            side,
            quantity,
            requested_price,
            actual_price,
            slippage,
            adverse_slippage,
            accepted,
            at: now,
        });

        if accepted {
            debug!(market_id, %slippage, "fill within slippage tolerance");
            return RiskCheckResult::pass();
        }

        warn!(
            market_id,
            %side,
            quantity,
            %requested_price,
            %actual_price,
            %slippage,
            max_slippage = %self.max_tolerance,
            "fill slippage exceeded tolerance"
        );
        RiskCheckResult::reject(ReasonCode::SlippageExceeded)
            .with_detail("market_id", market_id)
            .with_detail("side", side)
            .with_detail("quantity", quantity)
            .with_detail("requested_price", requested_price)
            .with_detail("actual_price", actual_price)
            .with_detail("slippage", slippage)
            .with_detail("adverse_slippage", adverse_slippage)
            .with_detail("max_slippage", self.max_tolerance)
    }

    fn record(&mut self, event: SlippageEvent) {
        self.fills += 1;
        if !event.accepted {
            self.rejections += 1;
        }
        self.total_slippage += event.slippage;
        self.max_slippage = self.max_slippage.max(event.slippage);

        if self.events.len() == EVENT_LOG_CAPACITY {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Most recent fills, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &SlippageEvent> {
        self.events.iter()
    }

    #[must_use]
    pub fn stats(&self) -> SlippageStats {
        let avg_slippage = if self.fills > 0 {
            self.total_slippage / Decimal::from(self.fills)
        } else {
            Decimal::ZERO
        };
        SlippageStats {
            fills: self.fills,
            rejections: self.rejections,
            avg_slippage,
            max_slippage: self.max_slippage,
        }
    }
}

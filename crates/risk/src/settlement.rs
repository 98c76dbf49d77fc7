//! Settlement tracking for exit proceeds.
//!
//! Proceeds from a closed position are not spendable until they settle a
//! number of business days later. Pre-trade checks use
//! [`SettlementTracker::available_balance`] so unsettled cash is never
//! committed.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::PositionId;
use tracing::debug;

/// Proceeds waiting to settle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSettlement {
    pub position_id: PositionId,
    pub amount: Decimal,
    pub closed_at: DateTime<Utc>,
    pub settles_at: DateTime<Utc>,
}

/// Read-only view for the risk summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementSnapshot {
    pub pending_count: usize,
    pub pending_amount: Decimal,
    pub next_settlement: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SettlementTracker {
    business_days: u32,
    pending: Vec<PendingSettlement>,
}

impl SettlementTracker {
    #[must_use]
    pub fn new(business_days: u32) -> Self {
        Self {
            business_days,
            pending: Vec::new(),
        }
    }

    /// When proceeds from an exit at `closed_at` become spendable.
    #[must_use]
    pub fn settlement_time(&self, closed_at: DateTime<Utc>) -> DateTime<Utc> {
        let mut settles_at = closed_at;
        let mut remaining = self.business_days;
        while remaining > 0 {
            settles_at += Duration::days(1);
            if !matches!(settles_at.weekday(), Weekday::Sat | Weekday::Sun) {
                remaining -= 1;
            }
        }
        settles_at
    }

    /// Starts tracking exit proceeds. Non-positive amounts are ignored.
    pub fn track(
        &mut self,
        position_id: PositionId,
        amount: Decimal,
        closed_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let settles_at = self.settlement_time(closed_at);
        if amount > Decimal::ZERO {
            debug!(position_id = %position_id, %amount, %settles_at, "tracking unsettled proceeds");
            self.pending.push(PendingSettlement {
                position_id,
                amount,
                closed_at,
                settles_at,
            });
        }
        settles_at
    }

    /// Sum of proceeds that have not settled as of `now`.
    #[must_use]
    pub fn pending_amount(&self, now: DateTime<Utc>) -> Decimal {
        self.pending
            .iter()
            .filter(|entry| entry.settles_at > now)
            .map(|entry| entry.amount)
            .sum()
    }

    /// Drops settled entries and returns the amount released.
    pub fn release_settled(&mut self, now: DateTime<Utc>) -> Decimal {
        let mut released = Decimal::ZERO;
        self.pending.retain(|entry| {
            if entry.settles_at <= now {
                released += entry.amount;
                false
            } else {
                true
            }
        });
        released
    }

    /// Reported balance minus unsettled proceeds, floored at zero.
    #[must_use]
    pub fn available_balance(&self, reported_balance: Decimal, now: DateTime<Utc>) -> Decimal {
        (reported_balance - self.pending_amount(now)).max(Decimal::ZERO)
    }

    #[must_use]
    pub fn pending(&self) -> &[PendingSettlement] {
        &self.pending
    }

    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> SettlementSnapshot {
        let outstanding = self.pending.iter().filter(|entry| entry.settles_at > now);
        SettlementSnapshot {
            pending_count: outstanding.clone().count(),
            pending_amount: self.pending_amount(now),
            next_settlement: outstanding.map(|entry| entry.settles_at).min(),
        }
    }
}

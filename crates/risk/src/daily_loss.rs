//! Daily loss limit.
//!
//! Once the limit trips it stays tripped for the rest of the session, even
//! if the balance recovers. Only a new [`DailyLossLimit::initialize_daily`]
//! call re-arms it.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Result of a daily loss check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLossCheck {
    /// False until `initialize_daily` has been called.
    pub initialized: bool,
    pub exceeded: bool,
    pub starting_balance: Decimal,
    pub current_balance: Decimal,
    /// `starting_balance - current_balance`; negative on a winning day.
    pub loss_amount: Decimal,
    /// `loss_amount / starting_balance`.
    pub loss_pct: Decimal,
    pub max_loss_pct: Decimal,
    pub max_loss_amount: Decimal,
}

#[derive(Debug, Clone, Copy)]
struct Session {
    starting_balance: Decimal,
    date: NaiveDate,
}

#[derive(Debug, Clone)]
pub struct DailyLossLimit {
    max_daily_loss_pct: Decimal,
    session: Option<Session>,
    tripped: bool,
}

impl DailyLossLimit {
    #[must_use]
    pub fn new(max_daily_loss_pct: Decimal) -> Self {
        Self {
            max_daily_loss_pct,
            session: None,
            tripped: false,
        }
    }

    /// Starts a new session and re-arms the limit.
    pub fn initialize_daily(&mut self, starting_balance: Decimal, date: NaiveDate) {
        self.session = Some(Session {
            starting_balance,
            date,
        });
        self.tripped = false;
        info!(
            %starting_balance,
            %date,
            max_loss = %(starting_balance * self.max_daily_loss_pct),
            "daily loss limit initialized"
        );
    }

    /// Checks the balance against the limit, latching on the first breach.
    pub fn check_daily_loss(&mut self, current_balance: Decimal) -> DailyLossCheck {
        let check = self.evaluate(current_balance);
        if check.exceeded && !self.tripped {
            self.tripped = true;
            error!(
                loss_amount = %check.loss_amount,
                loss_pct = %check.loss_pct,
                max_loss_pct = %self.max_daily_loss_pct,
                "daily loss limit exceeded, trading halted for the session"
            );
        }
        check
    }

    /// Same as [`check_daily_loss`](Self::check_daily_loss) without latching.
    #[must_use]
    pub fn evaluate(&self, current_balance: Decimal) -> DailyLossCheck {
        let Some(session) = self.session else {
            return DailyLossCheck {
                initialized: false,
                exceeded: false,
                starting_balance: Decimal::ZERO,
                current_balance,
                loss_amount: Decimal::ZERO,
                loss_pct: Decimal::ZERO,
                max_loss_pct: self.max_daily_loss_pct,
                max_loss_amount: Decimal::ZERO,
            };
        };

        let loss_amount = session.starting_balance - current_balance;
        let loss_pct = if session.starting_balance > Decimal::ZERO {
            loss_amount / session.starting_balance
        } else {
            Decimal::ZERO
        };

        DailyLossCheck {
            initialized: true,
            exceeded: self.tripped || loss_pct >= self.max_daily_loss_pct,
            starting_balance: session.starting_balance,
            current_balance,
            loss_amount,
            loss_pct,
            max_loss_pct: self.max_daily_loss_pct,
            max_loss_amount: session.starting_balance * self.max_daily_loss_pct,
        }
    }

    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    #[must_use]
    pub fn session_date(&self) -> Option<NaiveDate> {
        self.session.map(|session| session.date)
    }
}

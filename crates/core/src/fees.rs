//! Kalshi fee and P&L engine.
//!
//! Kalshi charges `multiplier * contracts * price * (1 - price)` per order,
//! rounded up to the next cent. The fee peaks at a price of 0.50 and
//! vanishes at 0 and 1. Because both legs of a round trip pay it, a small
//! favourable move is frequently a net loss; every P&L figure produced here
//! includes both fees.
//!
//! All prices are prices of the contract actually held. A short YES position
//! is a long NO position, so callers convert with
//! [`Side::contract_price`](crate::types::Side::contract_price) before
//! calling in.
//!
//! # Example
//!
//! ```
//! use spikebot_core::fees::{FeeEngine, FeeKind, FeeKinds};
//! use rust_decimal_macros::dec;
//!
//! let engine = FeeEngine::default();
//!
//! assert_eq!(engine.fee(100, dec!(0.60), FeeKind::Taker).unwrap(), dec!(1.68));
//!
//! let pnl = engine
//!     .calculate_pnl(dec!(0.60), dec!(0.70), 100, FeeKinds::TAKER)
//!     .unwrap();
//! assert_eq!(pnl.net_profit, dec!(6.85));
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::config::{ConfigError, FeeConfig};

// =============================================================================
// Fee Constants
// =============================================================================

/// Kalshi taker fee multiplier.
pub const TAKER_FEE_MULTIPLIER: Decimal = dec!(0.07);

/// Kalshi maker fee multiplier.
pub const MAKER_FEE_MULTIPLIER: Decimal = dec!(0.0175);

/// Decimal places kept on solver midpoints.
const SOLVER_SCALE: u32 = 8;

/// Rounds an amount up to the next whole cent.
#[must_use]
pub fn ceil_to_cent(amount: Decimal) -> Decimal {
    (amount * dec!(100)).ceil() / dec!(100)
}

// =============================================================================
// Types
// =============================================================================

/// Whether an order removes liquidity (taker) or rests on the book (maker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeKind {
    Taker,
    Maker,
}

/// Fee kinds of the two legs of a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeKinds {
    pub entry: FeeKind,
    pub exit: FeeKind,
}

impl FeeKinds {
    /// Market orders on both legs.
    pub const TAKER: Self = Self {
        entry: FeeKind::Taker,
        exit: FeeKind::Taker,
    };

    /// Resting orders on both legs.
    pub const MAKER: Self = Self {
        entry: FeeKind::Maker,
        exit: FeeKind::Maker,
    };

    #[must_use]
    pub const fn new(entry: FeeKind, exit: FeeKind) -> Self {
        Self { entry, exit }
    }
}

/// A single fee computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeQuote {
    pub contracts: u32,
    pub price: Decimal,
    pub kind: FeeKind,
    pub fee: Decimal,
}

/// Cash needed to open a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryCost {
    pub notional: Decimal,
    pub fee: Decimal,
    /// `notional + fee`
    pub total: Decimal,
}

/// Cash received when closing a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRevenue {
    pub notional: Decimal,
    pub fee: Decimal,
    /// `notional - fee`
    pub net: Decimal,
}

/// Full fee-aware breakdown of a round trip.
///
/// `net_profit == exit_revenue - entry_cost` and
/// `total_fees == entry_fee + exit_fee` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnLResult {
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub contracts: u32,
    pub entry_notional: Decimal,
    pub entry_fee: Decimal,
    /// Entry notional plus entry fee.
    pub entry_cost: Decimal,
    pub exit_notional: Decimal,
    pub exit_fee: Decimal,
    /// Exit notional minus exit fee.
    pub exit_revenue: Decimal,
    /// Price move times contracts, before fees.
    pub gross_profit: Decimal,
    pub total_fees: Decimal,
    pub net_profit: Decimal,
    /// `net_profit / entry_notional`, zero when nothing was paid.
    pub return_pct: Decimal,
}

impl PnLResult {
    #[must_use]
    pub fn is_profitable(&self) -> bool {
        self.net_profit > Decimal::ZERO
    }
}

/// How much of a price move the fees consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeImpact {
    pub gross_profit: Decimal,
    pub total_fees: Decimal,
    pub net_profit: Decimal,
    /// Fees as a fraction of gross profit, `None` when gross profit is not positive.
    pub fees_pct_of_gross: Option<Decimal>,
    pub profitable: bool,
}

/// Errors from the fee engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeeError {
    /// A contract price outside `[0, 1]`.
    #[error("price {price} is outside [0, 1]")]
    InvalidPrice { price: Decimal },

    /// No exit price in the search range reaches the target.
    #[error("target net profit {target} is unreachable, best achievable is {best}")]
    Unreachable { target: Decimal, best: Decimal },

    /// The solver hit its iteration cap. This indicates a bug.
    #[error("exit price solver did not converge after {iterations} iterations (bracket [{low}, {high}])")]
    DidNotConverge {
        iterations: u32,
        low: Decimal,
        high: Decimal,
    },
}

pub type Result<T> = std::result::Result<T, FeeError>;

fn validate_price(price: Decimal) -> Result<()> {
    if price < Decimal::ZERO || price > Decimal::ONE {
        return Err(FeeError::InvalidPrice { price });
    }
    Ok(())
}

// =============================================================================
// Fee Engine
// =============================================================================

/// Stateless fee calculator.
#[derive(Debug, Clone)]
pub struct FeeEngine {
    config: FeeConfig,
}

impl Default for FeeEngine {
    fn default() -> Self {
        Self {
            config: FeeConfig::default(),
        }
    }
}

impl FeeEngine {
    /// Creates an engine from a validated fee configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: FeeConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    #[must_use]
    pub fn multiplier(&self, kind: FeeKind) -> Decimal {
        match kind {
            FeeKind::Taker => self.config.taker_multiplier,
            FeeKind::Maker => self.config.maker_multiplier,
        }
    }

    /// Fee for one order, rounded up to the cent.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if `price` is outside `[0, 1]`.
    pub fn fee(&self, contracts: u32, price: Decimal, kind: FeeKind) -> Result<Decimal> {
        validate_price(price)?;
        Ok(self.fee_unchecked(contracts, price, kind))
    }

    /// Fee for one order as a [`FeeQuote`].
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if `price` is outside `[0, 1]`.
    pub fn quote(&self, contracts: u32, price: Decimal, kind: FeeKind) -> Result<FeeQuote> {
        Ok(FeeQuote {
            contracts,
            price,
            kind,
            fee: self.fee(contracts, price, kind)?,
        })
    }

    fn fee_unchecked(&self, contracts: u32, price: Decimal, kind: FeeKind) -> Decimal {
        if contracts == 0 {
            return Decimal::ZERO;
        }
        let raw = self.multiplier(kind) * Decimal::from(contracts) * price * (Decimal::ONE - price);
        let fee = ceil_to_cent(raw);
        debug_assert!(fee >= Decimal::ZERO, "negative fee {fee} at price {price}");
        fee
    }

    /// Cash needed to buy `contracts` at `price`.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if `price` is outside `[0, 1]`.
    pub fn entry_cost(&self, contracts: u32, price: Decimal, kind: FeeKind) -> Result<EntryCost> {
        validate_price(price)?;
        Ok(self.entry_cost_unchecked(contracts, price, kind))
    }

    fn entry_cost_unchecked(&self, contracts: u32, price: Decimal, kind: FeeKind) -> EntryCost {
        let notional = price * Decimal::from(contracts);
        let fee = self.fee_unchecked(contracts, price, kind);
        EntryCost {
            notional,
            fee,
            total: notional + fee,
        }
    }

    /// Cash received for selling `contracts` at `price`.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if `price` is outside `[0, 1]`.
    pub fn exit_revenue(&self, contracts: u32, price: Decimal, kind: FeeKind) -> Result<ExitRevenue> {
        validate_price(price)?;
        Ok(self.exit_revenue_unchecked(contracts, price, kind))
    }

    fn exit_revenue_unchecked(&self, contracts: u32, price: Decimal, kind: FeeKind) -> ExitRevenue {
        let notional = price * Decimal::from(contracts);
        let fee = self.fee_unchecked(contracts, price, kind);
        ExitRevenue {
            notional,
            fee,
            net: notional - fee,
        }
    }

    /// Round-trip P&L with both legs' fees applied.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if either price is outside `[0, 1]`.
    pub fn calculate_pnl(
        &self,
        entry_price: Decimal,
        exit_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> Result<PnLResult> {
        validate_price(entry_price)?;
        validate_price(exit_price)?;
        Ok(self.pnl_unchecked(entry_price, exit_price, contracts, kinds))
    }

    fn pnl_unchecked(
        &self,
        entry_price: Decimal,
        exit_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> PnLResult {
        let entry = self.entry_cost_unchecked(contracts, entry_price, kinds.entry);
        let exit = self.exit_revenue_unchecked(contracts, exit_price, kinds.exit);
        let net_profit = exit.net - entry.total;
        let return_pct = if entry.notional > Decimal::ZERO {
            net_profit / entry.notional
        } else {
            Decimal::ZERO
        };

        PnLResult {
            entry_price,
            exit_price,
            contracts,
            entry_notional: entry.notional,
            entry_fee: entry.fee,
            entry_cost: entry.total,
            exit_notional: exit.notional,
            exit_fee: exit.fee,
            exit_revenue: exit.net,
            gross_profit: exit.notional - entry.notional,
            total_fees: entry.fee + exit.fee,
            net_profit,
            return_pct,
        }
    }

    /// Exit price at which the round trip nets zero.
    ///
    /// Searches `[entry_price, 1]`.
    ///
    /// # Errors
    ///
    /// - [`FeeError::InvalidPrice`] for an entry price outside `[0, 1]`
    /// - [`FeeError::Unreachable`] when even an exit at 1.00 loses money
    /// - [`FeeError::DidNotConverge`] if the solver exhausts its iterations
    pub fn breakeven_exit_price(
        &self,
        entry_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> Result<Decimal> {
        validate_price(entry_price)?;
        self.solve_exit_price(entry_price, contracts, kinds, Decimal::ZERO, entry_price)
    }

    /// Exit price at which `exit_revenue == entry_cost + target_profit`.
    ///
    /// Searches the whole `[0, 1]` range, so negative targets (loss limits)
    /// resolve below the entry price.
    ///
    /// # Errors
    ///
    /// Same as [`breakeven_exit_price`](Self::breakeven_exit_price).
    pub fn required_exit_price_for_target_profit(
        &self,
        entry_price: Decimal,
        target_profit: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> Result<Decimal> {
        validate_price(entry_price)?;
        self.solve_exit_price(entry_price, contracts, kinds, target_profit, Decimal::ZERO)
    }

    /// Bisection on the exit price for a net profit of `target`.
    ///
    /// Net profit grows with the exit price apart from one-cent dips where
    /// the rounded fee steps up, so the bracket `[low, 1]` always keeps a
    /// crossing once `net(1) >= target`. The endpoint with the smaller
    /// residual is returned.
    fn solve_exit_price(
        &self,
        entry_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
        target: Decimal,
        low: Decimal,
    ) -> Result<Decimal> {
        let residual = |exit_price: Decimal| {
            self.pnl_unchecked(entry_price, exit_price, contracts, kinds)
                .net_profit
                - target
        };

        let mut lo = low;
        let mut hi = Decimal::ONE;

        let at_hi = residual(hi);
        if at_hi < Decimal::ZERO {
            return Err(FeeError::Unreachable {
                target,
                best: at_hi + target,
            });
        }
        if residual(lo) >= Decimal::ZERO {
            return Ok(lo);
        }

        let epsilon = self.config.solver_epsilon;
        let max_iterations = self.config.solver_max_iterations;

        for _ in 0..max_iterations {
            if hi - lo <= epsilon {
                return Ok(closer_endpoint(lo, hi, &residual));
            }
            let mid = ((lo + hi) / dec!(2)).round_dp(SOLVER_SCALE);
            if residual(mid) >= Decimal::ZERO {
                hi = mid;
            } else {
                lo = mid;
            }
        }

        if hi - lo <= epsilon {
            return Ok(closer_endpoint(lo, hi, &residual));
        }

        error!(
            %entry_price,
            contracts,
            %target,
            iterations = max_iterations,
            low = %lo,
            high = %hi,
            "exit price solver did not converge"
        );
        Err(FeeError::DidNotConverge {
            iterations: max_iterations,
            low: lo,
            high: hi,
        })
    }

    /// Relative price move from entry needed to break even.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`breakeven_exit_price`](Self::breakeven_exit_price).
    pub fn breakeven_move_pct(
        &self,
        entry_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> Result<Decimal> {
        let breakeven = self.breakeven_exit_price(entry_price, contracts, kinds)?;
        if entry_price.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok((breakeven - entry_price) / entry_price)
    }

    /// Summarizes how much of a move the fees eat.
    ///
    /// # Errors
    ///
    /// Returns [`FeeError::InvalidPrice`] if either price is outside `[0, 1]`.
    pub fn fee_impact(
        &self,
        entry_price: Decimal,
        exit_price: Decimal,
        contracts: u32,
        kinds: FeeKinds,
    ) -> Result<FeeImpact> {
        let pnl = self.calculate_pnl(entry_price, exit_price, contracts, kinds)?;
        let fees_pct_of_gross = if pnl.gross_profit > Decimal::ZERO {
            Some(pnl.total_fees / pnl.gross_profit)
        } else {
            None
        };
        Ok(FeeImpact {
            gross_profit: pnl.gross_profit,
            total_fees: pnl.total_fees,
            net_profit: pnl.net_profit,
            fees_pct_of_gross,
            profitable: pnl.is_profitable(),
        })
    }
}

fn closer_endpoint(lo: Decimal, hi: Decimal, residual: &impl Fn(Decimal) -> Decimal) -> Decimal {
    if residual(lo).abs() < residual(hi).abs() {
        lo
    } else {
        hi
    }
}

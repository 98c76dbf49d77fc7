//! Performance metrics for a finished backtest.
//!
//! Everything here is a pure function of the closed trades and the sampled
//! equity curve, so two identical runs always report identical metrics.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::{ExitReason, PnLResult, Position, PositionId, Side};

/// One closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub position_id: PositionId,
    pub market_id: String,
    pub side: Side,
    /// YES price at entry.
    pub entry_price: Decimal,
    /// YES price at exit.
    pub exit_price: Decimal,
    pub quantity: u32,
    /// Contract price times quantity at entry.
    pub entry_notional: Decimal,
    pub entry_fee: Decimal,
    pub entry_cost: Decimal,
    pub exit_notional: Decimal,
    pub exit_fee: Decimal,
    pub exit_revenue: Decimal,
    pub gross_profit: Decimal,
    pub total_fees: Decimal,
    pub net_pnl: Decimal,
    pub return_pct: Decimal,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub exit_reason: ExitReason,
}

impl TradeRecord {
    /// Pairs the closed position with the P&L the ledger booked for it.
    #[must_use]
    pub fn from_close(
        position: &Position,
        pnl: &PnLResult,
        exit_price: Decimal,
        closed_at: DateTime<Utc>,
        exit_reason: ExitReason,
    ) -> Self {
        Self {
            position_id: position.id,
            market_id: position.market_id.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            entry_notional: pnl.entry_notional,
            entry_fee: pnl.entry_fee,
            entry_cost: pnl.entry_cost,
            exit_notional: pnl.exit_notional,
            exit_fee: pnl.exit_fee,
            exit_revenue: pnl.exit_revenue,
            gross_profit: pnl.gross_profit,
            total_fees: pnl.total_fees,
            net_pnl: pnl.net_profit,
            return_pct: pnl.return_pct,
            opened_at: position.opened_at,
            closed_at,
            exit_reason,
        }
    }

    #[must_use]
    pub fn is_win(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }

    #[must_use]
    pub fn hold_secs(&self) -> i64 {
        (self.closed_at - self.opened_at).num_seconds()
    }
}

/// Sampled account value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    /// Cash plus liquidation value of open positions.
    pub equity: Decimal,
    pub cash: Decimal,
    pub open_positions: usize,
}

/// Gross profit over gross loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfitFactor {
    Finite(Decimal),
    /// Profits with no losing trade.
    Infinite,
}

impl ProfitFactor {
    #[must_use]
    pub fn from_totals(gross_profit: Decimal, gross_loss: Decimal) -> Self {
        if gross_loss > Decimal::ZERO {
            Self::Finite(gross_profit / gross_loss)
        } else if gross_profit > Decimal::ZERO {
            Self::Infinite
        } else {
            Self::Finite(Decimal::ZERO)
        }
    }

    #[must_use]
    pub fn is_infinite(&self) -> bool {
        matches!(self, Self::Infinite)
    }
}

/// Aggregate backtest statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,

    // Decimal amounts
    pub gross_profit: Decimal,
    /// Sum of losing trades, as a positive amount.
    pub gross_loss: Decimal,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    pub profit_factor: ProfitFactor,
    pub avg_win: Decimal,
    /// Mean losing trade, zero or negative.
    pub avg_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,

    // Risk
    pub max_drawdown: Decimal,
    /// Drawdown as a fraction of the peak it fell from.
    pub max_drawdown_pct: Decimal,
    /// Mean over sample standard deviation of per-trade `return_pct`.
    pub sharpe_ratio: f64,
    pub max_consecutive_losses: u32,
    pub avg_hold_time_secs: Option<f64>,
}

impl BacktestMetrics {
    /// Computes metrics for a run.
    ///
    /// A trade wins when its net P&L is positive; break-even trades count as
    /// losses. Drawdown is measured on the equity curve with the peak starting
    /// at `starting_balance`.
    #[must_use]
    pub fn from_trades(trades: &[TradeRecord], equity: &[EquityPoint], starting_balance: Decimal) -> Self {
        let winning_trades = trades.iter().filter(|t| t.is_win()).count();
        let losing_trades = trades.len() - winning_trades;

        let gross_profit: Decimal = trades.iter().filter(|t| t.is_win()).map(|t| t.net_pnl).sum();
        let gross_loss: Decimal = -trades
            .iter()
            .filter(|t| !t.is_win())
            .map(|t| t.net_pnl)
            .sum::<Decimal>();

        let (max_drawdown, max_drawdown_pct) = max_drawdown(equity, starting_balance);

        Self {
            total_trades: trades.len(),
            winning_trades,
            losing_trades,
            win_rate: ratio(winning_trades, trades.len()),
            gross_profit,
            gross_loss,
            total_pnl: trades.iter().map(|t| t.net_pnl).sum(),
            total_fees: trades.iter().map(|t| t.total_fees).sum(),
            profit_factor: ProfitFactor::from_totals(gross_profit, gross_loss),
            avg_win: mean_of(gross_profit, winning_trades),
            avg_loss: mean_of(-gross_loss, losing_trades),
            largest_win: trades
                .iter()
                .map(|t| t.net_pnl)
                .filter(|pnl| *pnl > Decimal::ZERO)
                .max()
                .unwrap_or(Decimal::ZERO),
            largest_loss: trades
                .iter()
                .map(|t| t.net_pnl)
                .filter(|pnl| *pnl < Decimal::ZERO)
                .min()
                .unwrap_or(Decimal::ZERO),
            max_drawdown,
            max_drawdown_pct,
            sharpe_ratio: sharpe_ratio(trades),
            max_consecutive_losses: max_consecutive_losses(trades),
            avg_hold_time_secs: avg_hold_time_secs(trades),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn mean_of(total: Decimal, count: usize) -> Decimal {
    if count == 0 {
        Decimal::ZERO
    } else {
        total / Decimal::from(count)
    }
}

fn max_drawdown(equity: &[EquityPoint], starting_balance: Decimal) -> (Decimal, Decimal) {
    let mut peak = starting_balance;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_pct = Decimal::ZERO;

    for point in equity {
        if point.equity > peak {
            peak = point.equity;
        }
        let drawdown = peak - point.equity;
        if drawdown > max_dd {
            max_dd = drawdown;
            max_dd_pct = if peak > Decimal::ZERO {
                drawdown / peak
            } else {
                Decimal::ZERO
            };
        }
    }
    (max_dd, max_dd_pct)
}

#[allow(clippy::cast_precision_loss)]
fn sharpe_ratio(trades: &[TradeRecord]) -> f64 {
    if trades.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = trades
        .iter()
        .map(|t| f64::try_from(t.return_pct).unwrap_or(0.0))
        .collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if std_dev > f64::EPSILON {
        mean / std_dev
    } else {
        0.0
    }
}

fn max_consecutive_losses(trades: &[TradeRecord]) -> u32 {
    let mut current = 0u32;
    let mut max = 0u32;
    for trade in trades {
        if trade.is_win() {
            current = 0;
        } else {
            current += 1;
            max = max.max(current);
        }
    }
    max
}

#[allow(clippy::cast_precision_loss)]
fn avg_hold_time_secs(trades: &[TradeRecord]) -> Option<f64> {
    if trades.is_empty() {
        return None;
    }
    let total: i64 = trades.iter().map(TradeRecord::hold_secs).sum();
    Some(total as f64 / trades.len() as f64)
}

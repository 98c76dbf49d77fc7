//! Shared value types passed between the signal boundary, the risk engine,
//! and the position ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a position inside a [`PositionLedger`](crate::ledger::PositionLedger).
///
/// Ids are assigned sequentially by the ledger, so replaying the same inputs
/// yields the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pos-{}", self.0)
    }
}

/// Direction of a position on a binary market.
///
/// `Long` holds the YES contract. `Short` holds the NO contract, whose price
/// is the complement of the quoted YES price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Converts a quoted YES price into the price of the contract this side holds.
    #[must_use]
    pub fn contract_price(self, yes_price: Decimal) -> Decimal {
        match self {
            Self::Long => yes_price,
            Self::Short => Decimal::ONE - yes_price,
        }
    }

    /// Order side used to open a position on this side.
    #[must_use]
    pub const fn entry_order(self) -> OrderSide {
        match self {
            Self::Long => OrderSide::Buy,
            Self::Short => OrderSide::Sell,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// Side of an individual order or fill, quoted against the YES price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A candidate trade produced by a signal generator.
///
/// Built once at the signal boundary; the core never calls back into the
/// signal source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeCandidate {
    pub market_id: String,
    pub side: Side,
    /// Quoted YES price at signal time.
    pub price: Decimal,
    /// Contracts to trade.
    pub quantity: u32,
    /// Signal confidence in `[0, 1]`.
    pub confidence: f64,
    /// Market liquidity in dollars when known.
    pub liquidity: Option<Decimal>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TradeCandidate {
    #[must_use]
    pub fn new(market_id: impl Into<String>, side: Side, price: Decimal, quantity: u32) -> Self {
        Self {
            market_id: market_id.into(),
            side,
            price,
            quantity,
            confidence: 0.0,
            liquidity: None,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    #[must_use]
    pub fn with_liquidity(mut self, liquidity: Decimal) -> Self {
        self.liquidity = Some(liquidity);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Price of the contract the candidate would hold.
    #[must_use]
    pub fn contract_price(&self) -> Decimal {
        self.side.contract_price(self.price)
    }
}

/// A price update from the market data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub market_id: String,
    /// Quoted YES price.
    pub price: Decimal,
    pub liquidity: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

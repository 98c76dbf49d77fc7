//! Entry signal detection for the replay loop.
//!
//! The engine only depends on [`SignalDetector`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spikebot_core::{ConfigError, Side, SpikeConfig, TradeCandidate};
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;

use crate::history::PricePoint;

/// A detected entry opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub market_id: String,
    pub side: Side,
    /// YES price of the point that triggered the signal.
    pub price: Decimal,
    /// Signed relative change against the previous sample.
    pub change_pct: Decimal,
    pub confidence: f64,
    pub liquidity: Option<Decimal>,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    /// Builds the candidate submitted to the risk coordinator.
    #[must_use]
    pub fn to_candidate(&self, quantity: u32) -> TradeCandidate {
        let mut candidate = TradeCandidate::new(&self.market_id, self.side, self.price, quantity)
            .with_confidence(self.confidence)
            .with_metadata("change_pct", serde_json::json!(self.change_pct));
        candidate.liquidity = self.liquidity;
        candidate
    }
}

/// Input a detector refused to interpret.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignalAnomaly {
    #[error("{market_id}: previous price {previous} is not positive")]
    NonPositivePrevious { market_id: String, previous: Decimal },

    #[error("{market_id}: move of {change_pct} exceeds plausible spike size {max_spike_pct}")]
    SuspiciousSpike {
        market_id: String,
        change_pct: Decimal,
        max_spike_pct: Decimal,
    },
}

/// Turns a price stream into entry signals.
pub trait SignalDetector {
    fn name(&self) -> &str;

    /// Feeds one point, in stream order.
    ///
    /// # Errors
    ///
    /// Returns a [`SignalAnomaly`] for input the detector cannot interpret;
    /// the caller skips the point.
    fn on_point(&mut self, market_id: &str, point: &PricePoint) -> Result<Option<Signal>, SignalAnomaly>;

    /// Forgets all per-market state.
    fn reset(&mut self);
}

/// Fires when the price moves by at least `spike_threshold` between
/// consecutive samples of one market.
///
/// Up moves open longs, down moves open shorts. A market stays quiet for
/// `cooldown_secs` after a signal.
#[derive(Debug, Clone)]
pub struct ThresholdSpikeDetector {
    config: SpikeConfig,
    last_price: HashMap<String, Decimal>,
    last_signal_at: HashMap<String, DateTime<Utc>>,
}

impl ThresholdSpikeDetector {
    /// # Errors
    ///
    /// Returns an error if the threshold is not positive.
    pub fn new(config: SpikeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            last_price: HashMap::new(),
            last_signal_at: HashMap::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &SpikeConfig {
        &self.config
    }

    /// `min(|change| / (3 * threshold), 1)`
    fn confidence(&self, change_pct: Decimal) -> f64 {
        let scaled = change_pct.abs() / (self.config.spike_threshold * Decimal::from(3));
        f64::try_from(scaled.min(Decimal::ONE)).unwrap_or(1.0)
    }
}

impl SignalDetector for ThresholdSpikeDetector {
    fn name(&self) -> &str {
        "threshold_spike"
    }

    fn on_point(&mut self, market_id: &str, point: &PricePoint) -> Result<Option<Signal>, SignalAnomaly> {
        let Some(previous) = self.last_price.insert(market_id.to_string(), point.price) else {
            return Ok(None);
        };
        if previous <= Decimal::ZERO {
            return Err(SignalAnomaly::NonPositivePrevious {
                market_id: market_id.to_string(),
                previous,
            });
        }

        let change_pct = (point.price - previous) / previous;
        if change_pct.abs() < self.config.spike_threshold {
            return Ok(None);
        }
        if change_pct.abs() > self.config.max_spike_pct {
            return Err(SignalAnomaly::SuspiciousSpike {
                market_id: market_id.to_string(),
                change_pct,
                max_spike_pct: self.config.max_spike_pct,
            });
        }

        if let Some(last) = self.last_signal_at.get(market_id) {
            if point.timestamp - *last < self.config.cooldown() {
                debug!(market_id, %change_pct, "spike inside cooldown");
                return Ok(None);
            }
        }
        self.last_signal_at.insert(market_id.to_string(), point.timestamp);

        let side = if change_pct > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        };
        debug!(market_id, %side, %change_pct, price = %point.price, "spike detected");

        Ok(Some(Signal {
            market_id: market_id.to_string(),
            side,
            price: point.price,
            change_pct,
            confidence: self.confidence(change_pct),
            liquidity: point.liquidity,
            timestamp: point.timestamp,
        }))
    }

    fn reset(&mut self) {
        self.last_price.clear();
        self.last_signal_at.clear();
    }
}

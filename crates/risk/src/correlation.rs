//! Event-group exposure limits.
//!
//! Markets about the same real-world event move together, so their open
//! cost is summed per event group and capped. Grouping is pluggable through
//! [`EventGrouper`]; the default derives the group from the ticker prefix.

use rust_decimal::Decimal;
use spikebot_core::{Position, RiskConfig};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::check::{ReasonCode, RiskCheckResult};

/// Group used for empty market ids.
pub const UNKNOWN_GROUP: &str = "UNKNOWN";

/// Maps a market id to the event group it belongs to.
pub trait EventGrouper: Send + Sync {
    fn group(&self, market_id: &str) -> String;
}

/// Groups by the ticker token before the first `-`.
///
/// Tickers starting with one of `multi_token_prefixes` and having more than
/// two tokens use the first two tokens, so `KX-FED-DEC` groups as `KX-FED`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerPrefixGrouper {
    multi_token_prefixes: Vec<String>,
}

impl TickerPrefixGrouper {
    #[must_use]
    pub fn new(multi_token_prefixes: Vec<String>) -> Self {
        Self {
            multi_token_prefixes,
        }
    }
}

impl Default for TickerPrefixGrouper {
    fn default() -> Self {
        Self::new(vec!["KX".to_string()])
    }
}

impl EventGrouper for TickerPrefixGrouper {
    fn group(&self, market_id: &str) -> String {
        let market_id = market_id.trim();
        if market_id.is_empty() {
            return UNKNOWN_GROUP.to_string();
        }

        let tokens: Vec<&str> = market_id.split('-').collect();
        match tokens.as_slice() {
            [first, second, _, ..] if self.multi_token_prefixes.iter().any(|p| p == first) => {
                format!("{first}-{second}")
            }
            [first, ..] => (*first).to_string(),
            [] => UNKNOWN_GROUP.to_string(),
        }
    }
}

pub struct CorrelationManager {
    grouper: Box<dyn EventGrouper>,
    max_event_exposure: Decimal,
}

impl fmt::Debug for CorrelationManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationManager")
            .field("max_event_exposure", &self.max_event_exposure)
            .finish_non_exhaustive()
    }
}

impl CorrelationManager {
    /// Creates a manager using the ticker-prefix grouping from `config`.
    #[must_use]
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            grouper: Box::new(TickerPrefixGrouper::new(config.multi_token_prefixes.clone())),
            max_event_exposure: config.max_event_exposure,
        }
    }

    /// Replaces the grouping heuristic.
    #[must_use]
    pub fn with_grouper(mut self, grouper: impl EventGrouper + 'static) -> Self {
        self.grouper = Box::new(grouper);
        self
    }

    #[must_use]
    pub fn group_for(&self, market_id: &str) -> String {
        self.grouper.group(market_id)
    }

    /// Open cost per event group.
    pub fn exposure_by_group<'a>(
        &self,
        positions: impl IntoIterator<Item = &'a Position>,
    ) -> BTreeMap<String, Decimal> {
        let mut exposure = BTreeMap::new();
        for position in positions {
            *exposure
                .entry(self.group_for(&position.market_id))
                .or_insert(Decimal::ZERO) += position.entry_cost;
        }
        exposure
    }

    /// Checks whether adding `potential_cost` to the market's group stays
    /// within the limit.
    pub fn check_exposure<'a>(
        &self,
        market_id: &str,
        potential_cost: Decimal,
        open_positions: impl IntoIterator<Item = &'a Position>,
    ) -> RiskCheckResult {
        let group = self.group_for(market_id);
        let current_exposure: Decimal = open_positions
            .into_iter()
            .filter(|position| self.group_for(&position.market_id) == group)
            .map(|position| position.entry_cost)
            .sum();
        let total_exposure = current_exposure + potential_cost;

        if total_exposure > self.max_event_exposure {
            return RiskCheckResult::reject(ReasonCode::CorrelationLimit)
                .with_detail("group", &group)
                .with_detail("current_exposure", current_exposure)
                .with_detail("potential_cost", potential_cost)
                .with_detail("max_exposure", self.max_event_exposure);
        }

        debug!(market_id, %group, %total_exposure, "event exposure within limit");
        RiskCheckResult::pass()
    }
}

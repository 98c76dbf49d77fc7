//! Historical replay for the spikebot trader.
//!
//! Prices are loaded into a [`PriceHistoryStore`], replayed through a
//! [`SignalDetector`] by the [`BacktestEngine`], and summarized as a
//! [`BacktestResult`] with [`BacktestMetrics`].

pub mod detector;
pub mod engine;
pub mod history;
pub mod metrics;

pub use detector::{Signal, SignalAnomaly, SignalDetector, ThresholdSpikeDetector};
pub use engine::{BacktestEngine, BacktestError, BacktestResult};
pub use history::{parse_timestamp, HistoryError, PriceHistoryStore, PricePoint};
pub use metrics::{BacktestMetrics, EquityPoint, ProfitFactor, TradeRecord};

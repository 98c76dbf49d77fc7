pub mod config;
pub mod config_loader;
pub mod fees;
pub mod ledger;
pub mod types;

pub use config::{
    BacktestConfig, BotConfig, ConfigError, ExitConfig, FeeConfig, RiskConfig, SpikeConfig,
    TrailingStopConfig,
};
pub use config_loader::ConfigLoader;
pub use fees::{
    EntryCost, ExitRevenue, FeeEngine, FeeError, FeeImpact, FeeKind, FeeKinds, FeeQuote, PnLResult,
};
pub use ledger::{ExitDecision, ExitReason, LedgerError, Position, PositionLedger, PositionStatus};
pub use types::{MarketTick, OrderSide, PositionId, Side, TradeCandidate};

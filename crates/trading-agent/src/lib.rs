//! Autonomous trading agent: the control loop that turns market snapshots into
//! Charter-checked, gated and routed trades, plus the paper collaborators it runs against.

pub mod config;
pub mod controller;
pub mod metrics;
pub mod narration;
pub mod order_router;
pub mod paper;
pub mod strategy_selector;
#[cfg(test)]
mod tests;

pub use config::{AgentConfig, TradingMode};
pub use controller::{AutonomousController, ControllerParts};
pub use metrics::AgentMetrics;
pub use narration::{RecordingNarrator, TracingNarrator};
pub use order_router::{OrderRouter, PlacedTrade};
pub use paper::{PaperBroker, RandomWalkFeed};
pub use strategy_selector::{SelectionContext, StrategyMeta, StrategyRank, StrategySelector};

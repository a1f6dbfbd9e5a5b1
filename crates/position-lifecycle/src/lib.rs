//! Position lifecycle: the shared position book, the per-position decision engine
//! and the periodic reassessment loop that carries decisions out at the broker.

pub mod book;
pub mod collaborator;
pub mod config;
pub mod engine;
pub mod manager;
pub mod trailing;

pub use book::{PositionBook, PositionSummary};
pub use collaborator::call_with_timeout;
pub use config::LifecycleConfig;
pub use engine::{evaluate_position, MarketContext, PositionAction, PositionUpdate};
pub use manager::LifecycleManager;

pub mod error;
pub mod stats;
pub mod symbols;
pub mod types;

pub use error::*;
pub use symbols::*;
pub use types::*;

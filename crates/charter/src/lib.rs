pub mod limits;
pub mod precheck;
#[cfg(test)]
mod tests;

pub use limits::{CharterError, CharterSummary, PolicyLimits};
pub use precheck::{CharterPrecheck, PrecheckOutcome};

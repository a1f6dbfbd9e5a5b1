pub mod circuit_breaker;
pub mod gates;
pub mod models;

pub use circuit_breaker::DailyCircuitBreaker;
pub use gates::AdmissionGate;
pub use models::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TradeError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Timed out after {0}ms")]
    Timeout(u64),

    #[error("Position not found: {0}")]
    PositionNotFound(String),
}

pub type TradeResult<T> = std::result::Result<T, TradeError>;

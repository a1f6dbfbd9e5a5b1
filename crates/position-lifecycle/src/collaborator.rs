use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use trade_core::TradeError;

/// Await a collaborator call, converting an overrun into `TradeError::Timeout`
pub async fn call_with_timeout<T, F>(limit: Duration, call: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TradeError::Timeout(limit.as_millis() as u64).into()),
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use trade_core::{OpenPosition, PositionStatus, TradeError, TradeResult};

use crate::engine::PositionUpdate;

/// Updates kept in memory for the audit trail
const HISTORY_CAPACITY: usize = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub open_positions: usize,
    pub total_pnl: f64,
    pub positions: Vec<OpenPosition>,
}

#[derive(Default)]
struct BookState {
    positions: HashMap<String, OpenPosition>,
    history: VecDeque<PositionUpdate>,
}

/// Single owner of open positions, keyed by symbol.
///
/// Cloning shares the same book. Every read-modify-write happens under one lock
/// acquisition so the control loop and the reassessment loop never see a
/// half-applied change.
#[derive(Clone, Default)]
pub struct PositionBook {
    inner: Arc<Mutex<BookState>>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly filled position. An active position on the same symbol is an error;
    /// a closed one is replaced.
    pub async fn register(&self, position: OpenPosition) -> TradeResult<()> {
        let mut state = self.inner.lock().await;
        if let Some(existing) = state.positions.get(&position.symbol) {
            if existing.is_active() {
                return Err(TradeError::InvalidInput(format!(
                    "{} already has an active position",
                    position.symbol
                )));
            }
        }
        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            units = position.units,
            entry = position.entry_price,
            "Position registered"
        );
        state.positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> Option<OpenPosition> {
        self.inner.lock().await.positions.get(symbol).cloned()
    }

    pub async fn is_active(&self, symbol: &str) -> bool {
        self.inner
            .lock()
            .await
            .positions
            .get(symbol)
            .is_some_and(|p| p.is_active())
    }

    pub async fn active(&self) -> Vec<OpenPosition> {
        let state = self.inner.lock().await;
        let mut positions: Vec<OpenPosition> = state.positions.values().filter(|p| p.is_active()).cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub async fn active_symbols(&self) -> Vec<String> {
        self.active().await.into_iter().map(|p| p.symbol).collect()
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.positions.values().filter(|p| p.is_active()).count()
    }

    pub async fn closed_count(&self) -> usize {
        self.inner
            .lock()
            .await
            .positions
            .values()
            .filter(|p| p.status == PositionStatus::Closed)
            .count()
    }

    /// Run `f` against one position while holding the lock
    pub async fn update_with<F, R>(&self, symbol: &str, f: F) -> TradeResult<R>
    where
        F: FnOnce(&mut OpenPosition) -> R,
    {
        let mut state = self.inner.lock().await;
        let position = state
            .positions
            .get_mut(symbol)
            .ok_or_else(|| TradeError::PositionNotFound(symbol.to_string()))?;
        Ok(f(position))
    }

    pub async fn mark_closed(&self, symbol: &str) -> TradeResult<()> {
        self.update_with(symbol, |p| p.status = PositionStatus::Closed).await?;
        tracing::info!(symbol, "Position closed");
        Ok(())
    }

    pub async fn record(&self, update: PositionUpdate) {
        let mut state = self.inner.lock().await;
        if state.history.len() >= HISTORY_CAPACITY {
            state.history.pop_front();
        }
        state.history.push_back(update);
    }

    pub async fn history(&self) -> Vec<PositionUpdate> {
        self.inner.lock().await.history.iter().cloned().collect()
    }

    pub async fn summary(&self) -> PositionSummary {
        let positions = self.active().await;
        PositionSummary {
            open_positions: positions.len(),
            total_pnl: positions.iter().map(|p| p.unrealized_pnl).sum(),
            positions,
        }
    }
}

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use broker_trait::{PriceFeed, RegimeAdvisor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trade_core::stats::{linear_slope, mean, population_std, simple_returns};
use trade_core::{MomentumConsensus, Regime, RegimeSignal};

/// Regime detection result with confidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeDetectionResult {
    pub regime: Regime,
    pub confidence: f64,
    pub metrics: RegimeMetrics,
    pub detected_at: DateTime<Utc>,
    pub reasoning: String,
}

impl RegimeDetectionResult {
    pub fn signal(&self) -> RegimeSignal {
        RegimeSignal {
            regime: self.regime,
            confidence: self.confidence,
            volatility: self.metrics.volatility,
        }
    }
}

/// Market regime metrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegimeMetrics {
    /// Regression slope per period, normalized by the mean price
    pub trend_strength: f64,

    /// Standard deviation of simple returns
    pub volatility: f64,

    /// Net movement / total movement (0.0 - 1.0)
    pub range_efficiency: f64,

    /// Fall from the window high to the last price (0.0 = at the high)
    pub drawdown: f64,

    /// Worst single-period return
    pub worst_return: f64,

    /// Share of periods moving with the net direction (0.0 - 1.0)
    pub directional_agreement: f64,

    /// Number of prices analyzed
    pub sample_size: usize,
}

/// Classification thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeThresholds {
    pub min_points: usize,
    pub trend_strength: f64,
    pub trending_efficiency: f64,
    pub ranging_efficiency: f64,
    pub ranging_max_volatility: f64,
    pub unstable_volatility: f64,
    pub crash_drawdown: f64,
    pub crash_single_return: f64,
}

impl Default for RegimeThresholds {
    fn default() -> Self {
        Self {
            min_points: 20,
            trend_strength: 0.0005,
            trending_efficiency: 0.5,
            ranging_efficiency: 0.3,
            ranging_max_volatility: 0.025,
            unstable_volatility: 0.03,
            crash_drawdown: 0.08,
            crash_single_return: -0.05,
        }
    }
}

/// Rule-based regime classifier over a close series.
///
/// With a price feed attached it also estimates momentum and consensus for a
/// symbol from the same metrics; without one the estimate is neutral (zeros).
pub struct MarketRegimeDetector {
    thresholds: RegimeThresholds,
    feed: Option<Arc<dyn PriceFeed>>,
    lookback: usize,
}

impl MarketRegimeDetector {
    pub fn new() -> Self {
        Self {
            thresholds: RegimeThresholds::default(),
            feed: None,
            lookback: 50,
        }
    }

    /// Create detector that can estimate momentum from `feed`
    pub fn with_feed(feed: Arc<dyn PriceFeed>, lookback: usize) -> Self {
        Self {
            feed: Some(feed),
            lookback,
            ..Self::new()
        }
    }

    pub fn with_thresholds(mut self, thresholds: RegimeThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Detect market regime using rule-based approach
    pub fn classify(&self, prices: &[f64]) -> RegimeDetectionResult {
        if prices.len() < self.thresholds.min_points {
            return RegimeDetectionResult {
                regime: Regime::Undetermined,
                confidence: 0.0,
                metrics: RegimeMetrics {
                    sample_size: prices.len(),
                    ..Default::default()
                },
                detected_at: Utc::now(),
                reasoning: format!(
                    "Insufficient data: {} prices (need {})",
                    prices.len(),
                    self.thresholds.min_points
                ),
            };
        }

        let metrics = calculate_metrics(prices);
        let (regime, confidence, reasoning) = self.classify_metrics(&metrics);

        RegimeDetectionResult {
            regime,
            confidence,
            metrics,
            detected_at: Utc::now(),
            reasoning,
        }
    }

    /// Momentum = efficiency scaled by how decisive the trend is; consensus = directional agreement
    pub fn estimate_momentum(&self, prices: &[f64]) -> MomentumConsensus {
        if prices.len() < self.thresholds.min_points {
            return MomentumConsensus::default();
        }
        let metrics = calculate_metrics(prices);
        let decisiveness = (metrics.trend_strength.abs() / self.thresholds.trend_strength).min(1.0);
        MomentumConsensus {
            momentum_score: (metrics.range_efficiency * decisiveness).clamp(0.0, 1.0),
            hive_consensus: metrics.directional_agreement,
        }
    }

    fn classify_metrics(&self, metrics: &RegimeMetrics) -> (Regime, f64, String) {
        let t = &self.thresholds;

        // Crash overrides scoring
        if metrics.drawdown >= t.crash_drawdown || metrics.worst_return <= t.crash_single_return {
            let reasoning = format!(
                "crash (drawdown: {:.2}%, worst return: {:.2}%)",
                metrics.drawdown * 100.0,
                metrics.worst_return * 100.0
            );
            return (Regime::Crash, 0.9, reasoning);
        }

        let mut scores = vec![
            (Regime::Bull, 0.0),
            (Regime::Bear, 0.0),
            (Regime::Sideways, 0.0),
            (Regime::Undetermined, 0.0),
        ];

        if metrics.volatility > t.unstable_volatility {
            scores[3].1 += 40.0;
        }

        if metrics.trend_strength > t.trend_strength && metrics.range_efficiency > t.trending_efficiency {
            scores[0].1 += 50.0 + 30.0 * metrics.directional_agreement;
        }

        if metrics.trend_strength < -t.trend_strength && metrics.range_efficiency > t.trending_efficiency {
            scores[1].1 += 50.0 + 30.0 * metrics.directional_agreement;
        }

        if metrics.range_efficiency < t.ranging_efficiency && metrics.volatility < t.ranging_max_volatility {
            scores[2].1 += 40.0;
            if metrics.trend_strength.abs() < t.trend_strength {
                scores[2].1 += 20.0;
            }
        }

        // Stable sort keeps bull/bear ahead on ties
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        let (regime, score) = scores[0];
        if score == 0.0 {
            return (
                Regime::Undetermined,
                0.0,
                format!(
                    "no regime rule matched (trend: {:.5}, efficiency: {:.2})",
                    metrics.trend_strength, metrics.range_efficiency
                ),
            );
        }

        let confidence = f64::min(score / 100.0, 1.0);
        let reasoning = format!(
            "{} (trend: {:.5}, volatility: {:.3}%, efficiency: {:.2}, agreement: {:.2})",
            regime,
            metrics.trend_strength,
            metrics.volatility * 100.0,
            metrics.range_efficiency,
            metrics.directional_agreement
        );

        (regime, confidence, reasoning)
    }
}

impl Default for MarketRegimeDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn calculate_metrics(prices: &[f64]) -> RegimeMetrics {
    let returns = simple_returns(prices);
    let avg_price = mean(prices);
    let trend_strength = if avg_price > 0.0 {
        linear_slope(prices) / avg_price
    } else {
        0.0
    };

    RegimeMetrics {
        trend_strength,
        volatility: population_std(&returns),
        range_efficiency: range_efficiency(prices),
        drawdown: drawdown_from_high(prices),
        worst_return: returns.iter().copied().fold(0.0, f64::min),
        directional_agreement: directional_agreement(prices),
        sample_size: prices.len(),
    }
}

fn range_efficiency(prices: &[f64]) -> f64 {
    let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
        return 0.0;
    };
    let total_movement: f64 = prices.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if total_movement == 0.0 {
        return 0.0;
    }
    (last - first).abs() / total_movement
}

fn drawdown_from_high(prices: &[f64]) -> f64 {
    let high = prices.iter().copied().fold(f64::MIN, f64::max);
    match prices.last() {
        Some(&last) if high > 0.0 => (high - last) / high,
        _ => 0.0,
    }
}

fn directional_agreement(prices: &[f64]) -> f64 {
    let (Some(first), Some(last)) = (prices.first(), prices.last()) else {
        return 0.0;
    };
    let net = last - first;
    let moves: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).filter(|m| *m != 0.0).collect();
    if net == 0.0 || moves.is_empty() {
        return 0.0;
    }
    let agreeing = moves.iter().filter(|m| m.signum() == net.signum()).count();
    agreeing as f64 / moves.len() as f64
}

#[async_trait]
impl RegimeAdvisor for MarketRegimeDetector {
    async fn detect_regime(&self, prices: &[f64]) -> Result<RegimeSignal> {
        let result = self.classify(prices);
        tracing::debug!(
            regime = %result.regime,
            confidence = result.confidence,
            "{}",
            result.reasoning
        );
        Ok(result.signal())
    }

    async fn momentum_consensus(&self, symbol: &str) -> Result<MomentumConsensus> {
        match &self.feed {
            Some(feed) => {
                let prices = feed.recent_prices(symbol, self.lookback).await?;
                Ok(self.estimate_momentum(&prices))
            }
            None => Ok(MomentumConsensus::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn trending(count: usize, step: f64) -> Vec<f64> {
        (0..count).map(|i| 100.0 + i as f64 * step).collect()
    }

    /// Oscillates around 100 without drifting
    fn choppy(count: usize) -> Vec<f64> {
        (0..count).map(|i| if i % 2 == 0 { 100.0 } else { 100.3 }).collect()
    }

    #[test]
    fn test_uptrend_detection() {
        let result = MarketRegimeDetector::new().classify(&trending(60, 0.5));
        assert_eq!(result.regime, Regime::Bull);
        assert!(result.metrics.trend_strength > 0.0);
        assert_relative_eq!(result.metrics.range_efficiency, 1.0, epsilon = 1e-9);
        assert_relative_eq!(result.confidence, 0.8, epsilon = 1e-9);
    }

    #[test]
    fn test_downtrend_detection() {
        // Shallow enough to stay under the crash drawdown
        let result = MarketRegimeDetector::new().classify(&trending(60, -0.1));
        assert_eq!(result.regime, Regime::Bear);
        assert!(result.metrics.trend_strength < 0.0);
    }

    #[test]
    fn test_sideways_and_flat() {
        let result = MarketRegimeDetector::new().classify(&choppy(60));
        assert_eq!(result.regime, Regime::Sideways);

        let flat = vec![1.1; 40];
        let result = MarketRegimeDetector::new().classify(&flat);
        assert_eq!(result.regime, Regime::Sideways);
        assert_relative_eq!(result.confidence, 0.6, epsilon = 1e-9);
    }

    #[test]
    fn test_crash_detection() {
        let mut prices = vec![100.0; 30];
        prices.extend([97.0, 94.0, 90.0]);
        let result = MarketRegimeDetector::new().classify(&prices);
        assert_eq!(result.regime, Regime::Crash);

        // A single gap down is enough
        let mut gap = trending(30, 0.1);
        let last = *gap.last().unwrap();
        gap.push(last * 0.94);
        assert_eq!(MarketRegimeDetector::new().classify(&gap).regime, Regime::Crash);
    }

    #[test]
    fn test_insufficient_data() {
        let result = MarketRegimeDetector::new().classify(&trending(10, 0.5));
        assert_eq!(result.regime, Regime::Undetermined);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.metrics.sample_size, 10);
    }

    #[test]
    fn test_momentum_estimate() {
        let detector = MarketRegimeDetector::new();
        let strong = detector.estimate_momentum(&trending(50, 0.5));
        assert_relative_eq!(strong.momentum_score, 1.0, epsilon = 1e-9);
        assert_relative_eq!(strong.hive_consensus, 1.0, epsilon = 1e-9);

        let chop = detector.estimate_momentum(&choppy(50));
        assert!(chop.momentum_score < 0.1);

        assert_eq!(detector.estimate_momentum(&[1.0, 1.1]).momentum_score, 0.0);
    }

    struct StaticFeed(Vec<f64>);

    #[async_trait]
    impl PriceFeed for StaticFeed {
        async fn recent_prices(&self, _symbol: &str, lookback: usize) -> Result<Vec<f64>> {
            let start = self.0.len().saturating_sub(lookback);
            Ok(self.0[start..].to_vec())
        }

        async fn current_price(&self, _symbol: &str) -> Result<f64> {
            self.0.last().copied().ok_or_else(|| anyhow::anyhow!("empty"))
        }
    }

    #[test]
    fn test_advisor_trait_uses_feed() {
        let detector = MarketRegimeDetector::with_feed(Arc::new(StaticFeed(trending(80, 0.2))), 50);
        let consensus = tokio_test::block_on(detector.momentum_consensus("SPY")).unwrap();
        assert!(consensus.momentum_score > 0.9);

        let signal = tokio_test::block_on(detector.detect_regime(&trending(50, 0.2))).unwrap();
        assert_eq!(signal.regime, Regime::Bull);

        let neutral = tokio_test::block_on(MarketRegimeDetector::new().momentum_consensus("SPY")).unwrap();
        assert_eq!(neutral.hive_consensus, 0.0);
    }
}

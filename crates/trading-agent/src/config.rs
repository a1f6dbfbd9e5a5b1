use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use leverage_sizer::LeverageSizer;
use trade_core::MarketClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradingMode {
    Paper,
    Live,
}

impl TradingMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(TradingMode::Paper),
            "live" => Ok(TradingMode::Live),
            other => bail!("TRADING_MODE must be 'paper' or 'live', got '{}'", other),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradingMode::Paper => "paper",
            TradingMode::Live => "live",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Mode and authorization
    pub trading_mode: TradingMode,
    pub charter_pin: Option<u32>,
    pub live_trading_approved: bool,

    // Universe
    pub symbols: Vec<String>,
    pub market_class: MarketClass,

    // Loop timing
    pub control_interval_seconds: u64,     // 60
    pub reassess_interval_seconds: u64,    // 60
    pub collaborator_timeout_ms: u64,      // 2000
    pub heartbeat_interval_cycles: u64,    // 1
    pub metrics_log_interval_cycles: u64,  // 10

    // Candidate generation
    pub price_lookback: usize,             // 50
    pub min_price_points: usize,           // 10
    pub max_strategies: usize,             // 2
    pub timeframe: String,                 // M15
    pub sizer_profile: String,             // default | conservative | aggressive

    // Paper collaborators
    pub paper_starting_balance: f64,       // 1000000
    pub paper_seed: u64,                   // 42
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            trading_mode: TradingMode::parse(
                &env::var("TRADING_MODE").unwrap_or_else(|_| "paper".to_string()),
            )?,
            charter_pin: match env::var("CHARTER_PIN") {
                Ok(pin) => Some(pin.trim().parse().context("CHARTER_PIN must be numeric")?),
                Err(_) => None,
            },
            live_trading_approved: env::var("LIVE_TRADING_APPROVED")
                .map(|v| v.eq_ignore_ascii_case("yes"))
                .unwrap_or(false),

            symbols: env::var("SYMBOLS")
                .unwrap_or_else(|_| "EUR_USD".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            market_class: {
                let raw = env::var("MARKET_CLASS").unwrap_or_else(|_| "fx".to_string());
                MarketClass::parse(&raw).with_context(|| format!("Unknown MARKET_CLASS '{raw}'"))?
            },

            control_interval_seconds: env::var("CONTROL_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            reassess_interval_seconds: env::var("REASSESS_INTERVAL_SECONDS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            collaborator_timeout_ms: env::var("COLLABORATOR_TIMEOUT_MS")
                .unwrap_or_else(|_| "2000".to_string())
                .parse()?,
            heartbeat_interval_cycles: env::var("HEARTBEAT_INTERVAL_CYCLES")
                .unwrap_or_else(|_| "1".to_string())
                .parse()?,
            metrics_log_interval_cycles: env::var("METRICS_LOG_INTERVAL_CYCLES")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,

            price_lookback: env::var("PRICE_LOOKBACK")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,
            min_price_points: env::var("MIN_PRICE_POINTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()?,
            max_strategies: env::var("MAX_STRATEGIES")
                .unwrap_or_else(|_| "2".to_string())
                .parse()?,
            timeframe: env::var("CANDIDATE_TIMEFRAME").unwrap_or_else(|_| "M15".to_string()),
            sizer_profile: env::var("SIZER_PROFILE")
                .unwrap_or_else(|_| "default".to_string())
                .to_ascii_lowercase(),

            paper_starting_balance: env::var("PAPER_STARTING_BALANCE")
                .unwrap_or_else(|_| "1000000".to_string())
                .parse()?,
            paper_seed: env::var("PAPER_SEED")
                .unwrap_or_else(|_| "42".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            bail!("SYMBOLS must name at least one instrument");
        }
        if self.control_interval_seconds == 0 || self.reassess_interval_seconds == 0 {
            bail!("Loop intervals must be positive");
        }
        if self.collaborator_timeout_ms == 0 {
            bail!("COLLABORATOR_TIMEOUT_MS must be positive");
        }
        if self.min_price_points < 2 || self.min_price_points > self.price_lookback {
            bail!(
                "MIN_PRICE_POINTS must be between 2 and PRICE_LOOKBACK ({}), got {}",
                self.price_lookback,
                self.min_price_points
            );
        }
        if self.max_strategies == 0 {
            bail!("MAX_STRATEGIES must be at least 1");
        }
        if !matches!(self.sizer_profile.as_str(), "default" | "conservative" | "aggressive") {
            bail!(
                "SIZER_PROFILE must be default, conservative or aggressive, got '{}'",
                self.sizer_profile
            );
        }
        if self.paper_starting_balance <= 0.0 {
            bail!("PAPER_STARTING_BALANCE must be positive");
        }
        Ok(())
    }

    pub fn control_interval(&self) -> Duration {
        Duration::from_secs(self.control_interval_seconds)
    }

    pub fn reassess_interval(&self) -> Duration {
        Duration::from_secs(self.reassess_interval_seconds)
    }

    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_millis(self.collaborator_timeout_ms)
    }

    pub fn leverage_sizer(&self) -> LeverageSizer {
        match self.sizer_profile.as_str() {
            "conservative" => LeverageSizer::conservative(),
            "aggressive" => LeverageSizer::aggressive(),
            _ => LeverageSizer::default(),
        }
    }

    pub fn is_live(&self) -> bool {
        self.trading_mode == TradingMode::Live
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paper,
            charter_pin: None,
            live_trading_approved: false,
            symbols: vec!["EUR_USD".to_string()],
            market_class: MarketClass::Fx,
            control_interval_seconds: 60,
            reassess_interval_seconds: 60,
            collaborator_timeout_ms: 2000,
            heartbeat_interval_cycles: 1,
            metrics_log_interval_cycles: 10,
            price_lookback: 50,
            min_price_points: 10,
            max_strategies: 2,
            timeframe: "M15".to_string(),
            sizer_profile: "default".to_string(),
            paper_starting_balance: 1_000_000.0,
            paper_seed: 42,
        }
    }
}

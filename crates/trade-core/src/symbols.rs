use serde::{Deserialize, Serialize};

/// Tickers that mark a symbol as crypto
pub const CRYPTO_KEYWORDS: [&str; 8] = ["BTC", "ETH", "XRP", "LTC", "BCH", "ADA", "DOT", "LINK"];

/// Quote-currency tokens used to bucket symbols for the correlation check
pub const USD_BUCKET_TOKENS: [&str; 6] = ["USD", "USDT", "USDC", "BUSD", "USDP", "TUSD"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketClass {
    Fx,
    Crypto,
    Futures,
    Equities,
}

impl MarketClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketClass::Fx => "fx",
            MarketClass::Crypto => "crypto",
            MarketClass::Futures => "futures",
            MarketClass::Equities => "equities",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fx" | "forex" => Some(MarketClass::Fx),
            "crypto" => Some(MarketClass::Crypto),
            "futures" => Some(MarketClass::Futures),
            "equities" | "equity" | "stocks" => Some(MarketClass::Equities),
            _ => None,
        }
    }
}

pub fn is_crypto(symbol: &str) -> bool {
    let upper = symbol.to_ascii_uppercase();
    CRYPTO_KEYWORDS.iter().any(|k| upper.contains(k))
}

/// Pip size: 0.01 for JPY crosses, 0.0001 otherwise
pub fn pip_size(symbol: &str) -> f64 {
    if symbol.to_ascii_uppercase().contains("JPY") {
        0.01
    } else {
        0.0001
    }
}

/// First bucket token contained in both symbols, if any.
/// Plain substring match, so "BTC-USD" and "EUR_USD" share the USD bucket.
pub fn shared_usd_bucket(a: &str, b: &str) -> Option<&'static str> {
    let a = a.to_ascii_uppercase();
    let b = b.to_ascii_uppercase();
    USD_BUCKET_TOKENS
        .iter()
        .copied()
        .find(|token| a.contains(token) && b.contains(token))
}

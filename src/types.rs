//! Shared domain types for the decision pipeline

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OHLCV candle as delivered by the market feed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,          // "BTCUSDT"
    pub interval: Interval,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub closed: bool,            // false while the candle is still forming
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

/// Supported kline intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour4,
    Day1,
}

impl Interval {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour4 => "4h",
            Interval::Day1 => "1d",
        }
    }

    pub fn to_seconds(&self) -> i64 {
        match self {
            Interval::Minute1 => 60,
            Interval::Minute5 => 300,
            Interval::Minute15 => 900,
            Interval::Minute30 => 1800,
            Interval::Hour1 => 3600,
            Interval::Hour4 => 14400,
            Interval::Day1 => 86400,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Interval::Minute1),
            "5m" => Some(Interval::Minute5),
            "15m" => Some(Interval::Minute15),
            "30m" => Some(Interval::Minute30),
            "1h" => Some(Interval::Hour1),
            "4h" => Some(Interval::Hour4),
            "1d" => Some(Interval::Day1),
            _ => None,
        }
    }
}

/// Trade direction carried by signals and positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    /// No actionable side; the portfolio rejects these
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Neutral => "neutral",
        }
    }
}

/// Signal strength/confidence level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl SignalStrength {
    /// Convert to numeric confidence value (0.0 - 1.0)
    pub fn to_confidence(&self) -> f64 {
        match self {
            SignalStrength::Weak => 0.4,
            SignalStrength::Moderate => 0.6,
            SignalStrength::Strong => 0.8,
            SignalStrength::VeryStrong => 0.95,
        }
    }
}

/// Entry signal produced by the strategy evaluator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub strength: SignalStrength,
    /// Close of the candle that produced the signal
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: f64,
    /// Detector that fired
    pub strategy: String,
    pub reason: String,
    /// Indicator values the detector saw
    pub indicators: IndicatorSnapshot,
    /// Regime the signal was produced under
    pub regime: RegimeState,
    pub created_at: DateTime<Utc>,
}

/// Indicator values computed on one candle slice
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub ema_9: f64,
    pub ema_21: f64,
    pub ema_50: f64,
    pub rsi_14: f64,
    pub atr_14: f64,
    pub atr_pct: f64,
    /// Instantaneous DX, not a smoothed average (see regime thresholds)
    pub adx_14: f64,
    pub volume_sma_20: f64,
    pub volume_ratio: f64,
    pub swing_high: f64,
    pub swing_low: f64,
}

/// Volatility bucket from ATR%
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    Low,
    Normal,
    High,
    Extreme,
}

impl Volatility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Volatility::Low => "low",
            Volatility::Normal => "normal",
            Volatility::High => "high",
            Volatility::Extreme => "extreme",
        }
    }
}

/// Trend bucket from EMA alignment + ADX
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    StrongUp,
    Up,
    Neutral,
    Down,
    StrongDown,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::StrongUp => "strong_up",
            Trend::Up => "up",
            Trend::Neutral => "neutral",
            Trend::Down => "down",
            Trend::StrongDown => "strong_down",
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(self, Trend::Up | Trend::StrongUp)
    }

    pub fn is_down(&self) -> bool {
        matches!(self, Trend::Down | Trend::StrongDown)
    }
}

/// Whether the current regime permits opening new positions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradePermission {
    Trade,
    /// Extreme volatility combined with extreme fear; no new entries
    Danger,
}

/// Classified market regime for one symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeState {
    pub symbol: String,
    pub volatility: Volatility,
    pub trend: Trend,
    pub permission: TradePermission,
    pub sentiment_score: f64,
    pub sentiment_label: String,
    /// Deterministic human-readable summary of the buckets above
    pub summary: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for RegimeState {
    fn default() -> Self {
        Self {
            symbol: String::new(),
            volatility: Volatility::Normal,
            trend: Trend::Neutral,
            permission: TradePermission::Trade,
            sentiment_score: 50.0,
            sentiment_label: "Neutral".to_string(),
            summary: String::new(),
            updated_at: Utc::now(),
        }
    }
}

/// Cached market sentiment reading
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentSnapshot {
    /// Fear & Greed index value, 0 (extreme fear) to 100 (extreme greed)
    pub score: f64,
    pub label: String,
    pub headlines: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl Default for SentimentSnapshot {
    fn default() -> Self {
        Self {
            score: 50.0,
            label: "Neutral".to_string(),
            headlines: Vec::new(),
            fetched_at: Utc::now(),
        }
    }
}

/// Error types for market data retrieval
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("invalid response format: {0}")]
    InvalidResponse(String),
}

/// Result type for feed operations
pub type FeedResult<T> = std::result::Result<T, FeedError>;

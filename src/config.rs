//! Engine configuration
//!
//! Settings are grouped per component and loaded from environment
//! variables with documented defaults, so a bare `riptide` run paper-trades
//! the majors without any setup.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Interval;

/// Full engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub feed: FeedSettings,
    pub strategy: StrategyParams,
    pub risk: RiskParams,
    pub exits: ExitParams,
    pub advisor: AdvisorSettings,
    pub engine: EngineSettings,
}

/// Market feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSettings {
    pub symbols: Vec<String>,
    pub interval: Interval,
    pub rest_url: String,
    pub ws_url: String,
    /// Candles retained per symbol
    pub buffer_capacity: usize,
    /// Historical candles fetched on startup
    pub bootstrap_candles: usize,
    pub bootstrap_attempts: u32,
    /// REST fallback poll cadence
    pub poll_interval_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_secs: u64,
    pub reconnect_max_attempts: u32,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            interval: Interval::Minute5,
            rest_url: "https://api.binance.com".to_string(),
            ws_url: "wss://stream.binance.com:9443/ws".to_string(),
            buffer_capacity: 500,
            bootstrap_candles: 200,
            bootstrap_attempts: 5,
            poll_interval_secs: 30,
            reconnect_base_secs: 1,
            reconnect_max_secs: 60,
            reconnect_max_attempts: 10,
        }
    }
}

fn default_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "SOLUSDT".to_string(),
    ]
}

/// Shared strategy knobs (detector thresholds live with the detectors)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    /// Signals below this risk:reward are discarded
    pub min_risk_reward: f64,
    /// Minimum candles between signals on the same symbol
    pub cooldown_candles: u32,
    /// Signal attempts per symbol per tick
    pub max_attempts_per_tick: u32,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            min_risk_reward: 1.2,
            cooldown_candles: 5,
            max_attempts_per_tick: 2,
        }
    }
}

/// Paper portfolio risk limits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    pub initial_capital: Decimal,
    pub max_open_positions: usize,
    /// Cap on a single position's notional as a fraction of equity
    pub max_position_pct: Decimal,
    /// Fraction of equity risked between entry and stop
    pub risk_per_trade: Decimal,
    /// Per-leg commission rate
    pub commission_rate: Decimal,
    /// Fraction of equity kept as uncommitted cash
    pub min_cash_reserve_pct: Decimal,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::from(10_000),
            max_open_positions: 3,
            max_position_pct: Decimal::new(25, 2),
            risk_per_trade: Decimal::new(2, 2),
            commission_rate: Decimal::new(1, 3),
            min_cash_reserve_pct: Decimal::new(10, 2),
        }
    }
}

/// Trailing-stop configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ExitParams {
    /// Directional profit fraction that arms the trailing stop
    pub trailing_activation_pct: Decimal,
    /// Distance of the trailing stop from the extreme favorable price
    pub trailing_distance_pct: Decimal,
}

impl Default for ExitParams {
    fn default() -> Self {
        Self {
            trailing_activation_pct: Decimal::new(15, 3),
            trailing_distance_pct: Decimal::new(1, 2),
        }
    }
}

/// External approval gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorSettings {
    /// Gate endpoint; signals pass through unreviewed when unset
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Approve signals when the gate itself fails (default: reject)
    pub fail_open: bool,
}

impl Default for AdvisorSettings {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 20,
            fail_open: false,
        }
    }
}

/// Orchestrator-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub sentiment_url: String,
    pub headlines_url: Option<String>,
    pub sentiment_refresh_secs: u64,
    pub state_path: String,
    pub state_write_secs: u64,
    /// Simulated fill slippage in basis points
    pub slippage_bps: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sentiment_url: "https://api.alternative.me/fng/".to_string(),
            headlines_url: None,
            sentiment_refresh_secs: 900,
            state_path: "state/now.json".to_string(),
            state_write_secs: 30,
            slippage_bps: 5,
        }
    }
}

impl Settings {
    /// Load settings from environment variables on top of the defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Settings::default();

        if let Ok(raw) = std::env::var("SYMBOLS") {
            let symbols: Vec<String> = raw
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if symbols.is_empty() {
                anyhow::bail!("SYMBOLS is set but contains no symbols");
            }
            settings.feed.symbols = symbols;
        }

        if let Ok(raw) = std::env::var("INTERVAL") {
            settings.feed.interval = Interval::parse(&raw).ok_or_else(|| {
                anyhow::anyhow!("Invalid INTERVAL '{}' (expected 1m/5m/15m/30m/1h/4h/1d)", raw)
            })?;
        }

        settings.feed.rest_url = std::env::var("BINANCE_REST_URL")
            .unwrap_or(settings.feed.rest_url);
        settings.feed.ws_url = std::env::var("BINANCE_WS_URL")
            .unwrap_or(settings.feed.ws_url);
        settings.feed.buffer_capacity = env_or("BUFFER_CAPACITY", settings.feed.buffer_capacity);
        settings.feed.bootstrap_candles =
            env_or("BOOTSTRAP_CANDLES", settings.feed.bootstrap_candles);
        settings.feed.poll_interval_secs =
            env_or("POLL_INTERVAL_SECS", settings.feed.poll_interval_secs);

        settings.strategy.min_risk_reward =
            env_or("MIN_RISK_REWARD", settings.strategy.min_risk_reward);
        settings.strategy.cooldown_candles =
            env_or("COOLDOWN_CANDLES", settings.strategy.cooldown_candles);
        settings.strategy.max_attempts_per_tick =
            env_or("MAX_SIGNAL_ATTEMPTS", settings.strategy.max_attempts_per_tick);

        settings.risk.initial_capital = env_or("INITIAL_CAPITAL", settings.risk.initial_capital);
        settings.risk.max_open_positions =
            env_or("MAX_OPEN_POSITIONS", settings.risk.max_open_positions);
        settings.risk.max_position_pct =
            env_or("MAX_POSITION_PCT", settings.risk.max_position_pct);
        settings.risk.risk_per_trade = env_or("RISK_PER_TRADE", settings.risk.risk_per_trade);
        settings.risk.commission_rate = env_or("COMMISSION_RATE", settings.risk.commission_rate);
        settings.risk.min_cash_reserve_pct =
            env_or("CASH_RESERVE_PCT", settings.risk.min_cash_reserve_pct);

        settings.exits.trailing_activation_pct =
            env_or("TRAILING_ACTIVATION_PCT", settings.exits.trailing_activation_pct);
        settings.exits.trailing_distance_pct =
            env_or("TRAILING_DISTANCE_PCT", settings.exits.trailing_distance_pct);

        settings.advisor.url = std::env::var("ADVISOR_URL").ok().or(settings.advisor.url);
        settings.advisor.timeout_secs =
            env_or("ADVISOR_TIMEOUT_SECS", settings.advisor.timeout_secs);
        settings.advisor.fail_open = env_or("ADVISOR_FAIL_OPEN", settings.advisor.fail_open);

        settings.engine.sentiment_url = std::env::var("SENTIMENT_URL")
            .unwrap_or(settings.engine.sentiment_url);
        settings.engine.headlines_url = std::env::var("HEADLINES_URL")
            .ok()
            .or(settings.engine.headlines_url);
        settings.engine.sentiment_refresh_secs =
            env_or("SENTIMENT_REFRESH_SECS", settings.engine.sentiment_refresh_secs);
        settings.engine.state_path =
            std::env::var("STATE_PATH").unwrap_or(settings.engine.state_path);
        settings.engine.state_write_secs =
            env_or("STATE_WRITE_SECS", settings.engine.state_write_secs);
        settings.engine.slippage_bps = env_or("SLIPPAGE_BPS", settings.engine.slippage_bps);

        Ok(settings)
    }
}

/// Parse an env var, falling back to the default on absence or bad input
fn env_or<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring unparseable {}={}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

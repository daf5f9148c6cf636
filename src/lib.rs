//! Riptide
//!
//! Regime-aware paper trading engine for crypto spot markets. A market
//! feed streams closed candles, indicators and a regime classifier set
//! the context, a prioritized strategy chain proposes entries, an
//! external advisor gets a veto, and a simulated portfolio tracks the
//! results with exchange-style commissions.

pub mod advisor;
pub mod config;
pub mod engine;
pub mod exits;
pub mod feed;
pub mod indicators;
pub mod portfolio;
pub mod regime;
pub mod sentiment;
pub mod state;
pub mod strategy;
pub mod types;

// Re-export main types for convenience
pub use advisor::{GateDecision, HttpSignalGate, PassthroughGate, ReviewContext, SignalGate, Verdict};
pub use config::Settings;
pub use engine::Engine;
pub use exits::{ExitManager, ExitReason};
pub use feed::MarketFeed;
pub use indicators::IndicatorEngine;
pub use portfolio::{ClosedTrade, Position, PortfolioState, RiskPortfolio, TradeOutcome};
pub use regime::RegimeClassifier;
pub use sentiment::SentimentFeed;
pub use state::{EngineState, EngineStatus, StateWriter};
pub use strategy::{Detector, SignalDraft, StrategyContext, StrategyEvaluator};
pub use types::{Candle, Direction, Interval, RegimeState, SignalStrength, TradeSignal};

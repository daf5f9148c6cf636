//! Status snapshots for observability
//!
//! The engine serializes its whole view (prices, regimes, portfolio,
//! recent errors) to a JSON file on a timer so an operator or another
//! process can inspect the run without attaching to it.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::portfolio::PortfolioState;
use crate::types::{RegimeState, SentimentSnapshot, TradeSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineStatus {
    Starting,
    Running,
    /// Still running, but the recent error rate crossed the high-water mark
    Degraded,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub context: String,
    pub message: String,
}

/// Outcome of the last advisor consultation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub signal_id: Uuid,
    pub symbol: String,
    pub decision: String,
    pub confidence: f64,
    pub reasoning: String,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    pub status: EngineStatus,
    pub started_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub stream_connected: bool,
    pub prices: HashMap<String, Decimal>,
    pub regimes: HashMap<String, RegimeState>,
    pub sentiment: SentimentSnapshot,
    pub portfolio: PortfolioState,
    pub last_signal: Option<TradeSignal>,
    pub last_review: Option<ReviewRecord>,
    pub recent_errors: Vec<ErrorRecord>,
    pub total_errors: u64,
}

pub struct StateWriter {
    path: PathBuf,
}

impl StateWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub async fn write(&self, state: &EngineState) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(state)?;
        fs::write(&self.path, json).await?;
        debug!("Wrote {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RiskParams;
    use crate::portfolio::RiskPortfolio;

    fn fixture_state() -> EngineState {
        let portfolio = RiskPortfolio::new(RiskParams::default());
        EngineState {
            status: EngineStatus::Running,
            started_at: Utc::now(),
            generated_at: Utc::now(),
            uptime_secs: 123,
            stream_connected: true,
            prices: HashMap::from([("BTCUSDT".to_string(), Decimal::new(50_000, 0))]),
            regimes: HashMap::new(),
            sentiment: SentimentSnapshot::default(),
            portfolio: portfolio.snapshot(),
            last_signal: None,
            last_review: None,
            recent_errors: vec![ErrorRecord {
                at: Utc::now(),
                context: "stream".to_string(),
                message: "websocket stream lost".to_string(),
            }],
            total_errors: 1,
        }
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("now.json");
        let writer = StateWriter::new(&path);

        writer.write(&fixture_state()).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: EngineState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.status, EngineStatus::Running);
        assert_eq!(parsed.prices["BTCUSDT"], Decimal::new(50_000, 0));
        assert_eq!(parsed.total_errors, 1);
        assert_eq!(parsed.recent_errors.len(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("now.json");
        let writer = StateWriter::new(&path);

        let mut state = fixture_state();
        writer.write(&state).await.unwrap();

        state.status = EngineStatus::Degraded;
        writer.write(&state).await.unwrap();

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: EngineState = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.status, EngineStatus::Degraded);
    }
}

//! External signal review
//!
//! Every signal that survives the strategy chain is sent to a reviewer
//! before any position is opened. [`SignalGate`] is the seam: the HTTP
//! gate posts the signal with market context to a configured endpoint,
//! the passthrough gate approves everything when no endpoint is set.
//! What happens when the reviewer cannot be reached is the engine's
//! decision, not the gate's.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::TradeSignal;

const DEFAULT_DELAY_MINUTES: u32 = 30;

/// Market context shipped alongside the signal under review
#[derive(Debug, Clone, Serialize)]
pub struct ReviewContext {
    pub sentiment_score: f64,
    pub sentiment_label: String,
    pub headlines: Vec<String>,
    pub regime_summary: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Approve,
    Reject,
    Delay { minutes: u32 },
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Approve => "approve",
            Verdict::Reject => "reject",
            Verdict::Delay { .. } => "delay",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GateDecision {
    pub verdict: Verdict,
    pub confidence: f64,
    pub reasoning: String,
}

#[async_trait]
pub trait SignalGate: Send + Sync {
    async fn review(&self, signal: &TradeSignal, context: &ReviewContext) -> Result<GateDecision>;
}

/// Approves everything. Used when no advisor endpoint is configured.
pub struct PassthroughGate;

#[async_trait]
impl SignalGate for PassthroughGate {
    async fn review(&self, _signal: &TradeSignal, _context: &ReviewContext) -> Result<GateDecision> {
        Ok(GateDecision {
            verdict: Verdict::Approve,
            confidence: 1.0,
            reasoning: "No external reviewer configured".to_string(),
        })
    }
}

#[derive(Serialize)]
struct ReviewRequest<'a> {
    signal_id: uuid::Uuid,
    symbol: &'a str,
    direction: &'a str,
    strategy: &'a str,
    entry: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    risk_reward: f64,
    confidence: f64,
    reason: &'a str,
    regime_summary: &'a str,
    sentiment_score: f64,
    sentiment_label: &'a str,
    headlines: &'a [String],
}

#[derive(Deserialize)]
struct WireDecision {
    decision: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    delay_minutes: Option<u32>,
}

pub struct HttpSignalGate {
    client: reqwest::Client,
    url: String,
}

impl HttpSignalGate {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build advisor HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SignalGate for HttpSignalGate {
    async fn review(&self, signal: &TradeSignal, context: &ReviewContext) -> Result<GateDecision> {
        let request = ReviewRequest {
            signal_id: signal.id,
            symbol: &signal.symbol,
            direction: signal.direction.as_str(),
            strategy: &signal.strategy,
            entry: signal.entry,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            risk_reward: signal.risk_reward,
            confidence: signal.strength.to_confidence(),
            reason: &signal.reason,
            regime_summary: &context.regime_summary,
            sentiment_score: context.sentiment_score,
            sentiment_label: &context.sentiment_label,
            headlines: &context.headlines,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .context("Advisor request failed")?;
        if !response.status().is_success() {
            bail!("Advisor returned {}", response.status());
        }
        let wire: WireDecision = response
            .json()
            .await
            .context("Invalid advisor response")?;
        decision_from_wire(wire)
    }
}

fn decision_from_wire(wire: WireDecision) -> Result<GateDecision> {
    let verdict = match wire.decision.to_lowercase().as_str() {
        "approve" => Verdict::Approve,
        "reject" => Verdict::Reject,
        "delay" => Verdict::Delay {
            minutes: wire.delay_minutes.unwrap_or(DEFAULT_DELAY_MINUTES),
        },
        other => bail!("Advisor returned unknown decision '{other}'"),
    };
    Ok(GateDecision {
        verdict,
        confidence: wire.confidence,
        reasoning: wire.reasoning,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, IndicatorSnapshot, RegimeState, SignalStrength};
    use chrono::Utc;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fixture_signal() -> TradeSignal {
        TradeSignal {
            id: uuid::Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            strength: SignalStrength::Strong,
            entry: Decimal::new(50_000, 0),
            stop_loss: Decimal::new(49_000, 0),
            take_profit: Decimal::new(52_500, 0),
            risk_reward: 2.5,
            strategy: "ema_cross".to_string(),
            reason: "EMA9 crossed above EMA21".to_string(),
            indicators: IndicatorSnapshot::default(),
            regime: RegimeState::default(),
            created_at: Utc::now(),
        }
    }

    fn fixture_context() -> ReviewContext {
        ReviewContext {
            sentiment_score: 42.0,
            sentiment_label: "Fear".to_string(),
            headlines: vec!["Funding rates reset".to_string()],
            regime_summary: "normal volatility, up trend".to_string(),
        }
    }

    #[tokio::test]
    async fn test_approval_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .and(body_partial_json(serde_json::json!({
                "symbol": "BTCUSDT",
                "direction": "long",
                "sentiment_score": 42.0
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "decision": "approve",
                "confidence": 0.82,
                "reasoning": "Trend and sentiment agree"
            })))
            .mount(&server)
            .await;

        let gate = HttpSignalGate::new(format!("{}/review", server.uri()), 5).unwrap();
        let decision = gate
            .review(&fixture_signal(), &fixture_context())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Approve);
        assert!((decision.confidence - 0.82).abs() < 1e-9);
        assert_eq!(decision.reasoning, "Trend and sentiment agree");
    }

    #[tokio::test]
    async fn test_delay_carries_minutes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "decision": "delay",
                "confidence": 0.5,
                "reasoning": "News pending",
                "delay_minutes": 45
            })))
            .mount(&server)
            .await;

        let gate = HttpSignalGate::new(format!("{}/review", server.uri()), 5).unwrap();
        let decision = gate
            .review(&fixture_signal(), &fixture_context())
            .await
            .unwrap();

        assert_eq!(decision.verdict, Verdict::Delay { minutes: 45 });
    }

    #[tokio::test]
    async fn test_unknown_decision_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "decision": "maybe"
            })))
            .mount(&server)
            .await;

        let gate = HttpSignalGate::new(format!("{}/review", server.uri()), 5).unwrap();
        assert!(gate
            .review(&fixture_signal(), &fixture_context())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_server_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/review"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let gate = HttpSignalGate::new(format!("{}/review", server.uri()), 5).unwrap();
        assert!(gate
            .review(&fixture_signal(), &fixture_context())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_passthrough_always_approves() {
        let decision = PassthroughGate
            .review(&fixture_signal(), &fixture_context())
            .await
            .unwrap();
        assert_eq!(decision.verdict, Verdict::Approve);
    }
}

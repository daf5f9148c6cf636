//! Entry strategy detectors
//!
//! Each detector is a pure trigger with the same signature; the evaluator
//! walks them in fixed priority order and the first draft wins. Regime
//! permission and the per-symbol cooldown are checked once per tick before
//! any detector runs. A draft that fails the risk:reward floor is discarded
//! and the chain continues; downstream rejections (sizing, approval gate)
//! are the orchestrator's concern and end the tick instead.
//!
//! Adding a strategy means implementing [`Detector`] in a new file and
//! inserting it into [`default_bank`] at the right priority.

pub mod continuation;
pub mod ema_bounce;
pub mod ema_cross;
pub mod mean_reversion;
pub mod momentum;
pub mod rsi_reversal;
pub mod scalp;
pub mod structure_break;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::StrategyParams;
use crate::types::{
    Candle, Direction, IndicatorSnapshot, RegimeState, SignalStrength, TradePermission,
    TradeSignal,
};

pub use continuation::ContinuationDetector;
pub use ema_bounce::EmaBounceDetector;
pub use ema_cross::EmaCrossDetector;
pub use mean_reversion::MeanReversionDetector;
pub use momentum::MomentumDetector;
pub use rsi_reversal::RsiReversalDetector;
pub use scalp::QuickScalpDetector;
pub use structure_break::StructureBreakDetector;

/// Everything a detector may look at for one tick
pub struct StrategyContext<'a> {
    pub symbol: &'a str,
    pub candles: &'a [Candle],
    pub indicators: &'a IndicatorSnapshot,
    pub regime: &'a RegimeState,
    /// Close of the tick's candle
    pub price: f64,
    pub prev_close: f64,
}

impl<'a> StrategyContext<'a> {
    pub fn new(
        symbol: &'a str,
        candles: &'a [Candle],
        indicators: &'a IndicatorSnapshot,
        regime: &'a RegimeState,
    ) -> Self {
        let price = candles
            .last()
            .and_then(|c| c.close.to_f64())
            .unwrap_or(0.0);
        let prev_close = candles
            .len()
            .checked_sub(2)
            .and_then(|i| candles[i].close.to_f64())
            .unwrap_or(price);
        Self {
            symbol,
            candles,
            indicators,
            regime,
            price,
            prev_close,
        }
    }

    pub fn last_candle(&self) -> Option<&'a Candle> {
        self.candles.last()
    }
}

/// Unfinalized signal as produced by a detector
#[derive(Debug, Clone)]
pub struct SignalDraft {
    pub direction: Direction,
    pub strength: SignalStrength,
    pub entry: f64,
    pub stop: f64,
    pub target: f64,
    pub reason: String,
}

impl SignalDraft {
    pub fn risk_reward(&self) -> f64 {
        let risk = (self.entry - self.stop).abs();
        if risk <= 0.0 {
            return 0.0;
        }
        (self.target - self.entry).abs() / risk
    }
}

/// Stop and target from ATR multiples on the entry side
pub fn atr_levels(
    direction: Direction,
    entry: f64,
    atr: f64,
    stop_mult: f64,
    target_mult: f64,
) -> (f64, f64) {
    match direction {
        Direction::Short => (entry + atr * stop_mult, entry - atr * target_mult),
        _ => (entry - atr * stop_mult, entry + atr * target_mult),
    }
}

/// A single entry trigger
pub trait Detector: Send + Sync {
    fn name(&self) -> &'static str;
    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft>;
}

/// All detectors in priority order
pub fn default_bank() -> Vec<Box<dyn Detector>> {
    vec![
        Box::new(EmaCrossDetector),
        Box::new(RsiReversalDetector),
        Box::new(MomentumDetector),
        Box::new(StructureBreakDetector),
        Box::new(EmaBounceDetector),
        Box::new(MeanReversionDetector),
        Box::new(ContinuationDetector),
        Box::new(QuickScalpDetector),
    ]
}

pub struct StrategyEvaluator {
    params: StrategyParams,
    detectors: Vec<Box<dyn Detector>>,
    /// Open time of the last signal candle per symbol, for the cooldown
    last_signal_open: HashMap<String, DateTime<Utc>>,
}

impl StrategyEvaluator {
    pub fn new(params: StrategyParams) -> Self {
        Self::with_detectors(params, default_bank())
    }

    pub fn with_detectors(params: StrategyParams, detectors: Vec<Box<dyn Detector>>) -> Self {
        Self {
            params,
            detectors,
            last_signal_open: HashMap::new(),
        }
    }

    /// Run the detector chain for one tick. Returns the first draft that
    /// clears the risk:reward floor, finalized into a [`TradeSignal`].
    pub fn evaluate(&mut self, ctx: &StrategyContext) -> Option<TradeSignal> {
        let candle = ctx.last_candle()?;

        if ctx.regime.permission == TradePermission::Danger {
            debug!("{}: regime forbids new entries", ctx.symbol);
            return None;
        }
        if self.in_cooldown(ctx.symbol, candle) {
            debug!("{}: signal cooldown active", ctx.symbol);
            return None;
        }

        for detector in &self.detectors {
            let Some(draft) = detector.evaluate(ctx) else {
                continue;
            };
            let rr = draft.risk_reward();
            if rr < self.params.min_risk_reward {
                debug!(
                    "{}: {} draft below risk:reward floor ({:.2} < {:.2})",
                    ctx.symbol,
                    detector.name(),
                    rr,
                    self.params.min_risk_reward
                );
                continue;
            }
            let Some(signal) = finalize(ctx, detector.name(), draft) else {
                continue;
            };
            self.last_signal_open
                .insert(ctx.symbol.to_string(), candle.open_time);
            return Some(signal);
        }
        None
    }

    fn in_cooldown(&self, symbol: &str, candle: &Candle) -> bool {
        let Some(last_open) = self.last_signal_open.get(symbol) else {
            return false;
        };
        let elapsed = (candle.open_time - *last_open).num_seconds()
            / candle.interval.to_seconds().max(1);
        elapsed < self.params.cooldown_candles as i64
    }
}

/// Attach identity, provenance, and Decimal price levels to a draft
fn finalize(ctx: &StrategyContext, detector: &str, draft: SignalDraft) -> Option<TradeSignal> {
    let entry = decimal_from(draft.entry)?;
    let stop_loss = decimal_from(draft.stop)?;
    let take_profit = decimal_from(draft.target)?;

    Some(TradeSignal {
        id: uuid::Uuid::new_v4(),
        symbol: ctx.symbol.to_string(),
        direction: draft.direction,
        strength: draft.strength,
        entry,
        stop_loss,
        take_profit,
        risk_reward: draft.risk_reward(),
        strategy: detector.to_string(),
        reason: draft.reason,
        indicators: ctx.indicators.clone(),
        regime: ctx.regime.clone(),
        created_at: ctx.last_candle().map(|c| c.close_time).unwrap_or_else(Utc::now),
    })
}

fn decimal_from(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        debug!("Discarding signal with non-finite level {}", value);
        return None;
    }
    Decimal::try_from(value).ok()
}


#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use crate::types::{Trend, Volatility};

    struct AlwaysLong {
        target_mult: f64,
    }

    impl Detector for AlwaysLong {
        fn name(&self) -> &'static str {
            "always_long"
        }
        fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
            let (stop, target) = atr_levels(
                Direction::Long,
                ctx.price,
                ctx.indicators.atr_14,
                1.0,
                self.target_mult,
            );
            Some(SignalDraft {
                direction: Direction::Long,
                strength: SignalStrength::Moderate,
                entry: ctx.price,
                stop,
                target,
                reason: "always fires".to_string(),
            })
        }
    }

    struct NeverFires;

    impl Detector for NeverFires {
        fn name(&self) -> &'static str {
            "never_fires"
        }
        fn evaluate(&self, _ctx: &StrategyContext) -> Option<SignalDraft> {
            None
        }
    }

    fn params() -> StrategyParams {
        StrategyParams {
            min_risk_reward: 1.2,
            cooldown_candles: 3,
            max_attempts_per_tick: 2,
        }
    }

    #[test]
    fn test_first_matching_detector_wins() {
        let candles = flat_candles(30);
        let snapshot = base_snapshot();
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        let mut evaluator = StrategyEvaluator::with_detectors(
            params(),
            vec![
                Box::new(NeverFires),
                Box::new(AlwaysLong { target_mult: 2.0 }),
                Box::new(AlwaysLong { target_mult: 9.0 }),
            ],
        );

        let signal = evaluator.evaluate(&ctx).unwrap();
        assert_eq!(signal.strategy, "always_long");
        assert!((signal.risk_reward - 2.0).abs() < 1e-9);
        assert_eq!(signal.direction, Direction::Long);
    }

    #[test]
    fn test_rr_floor_falls_through_to_next_detector() {
        let candles = flat_candles(30);
        let snapshot = base_snapshot();
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        // first detector's draft is below the 1.2 floor, second clears it
        let mut evaluator = StrategyEvaluator::with_detectors(
            params(),
            vec![
                Box::new(AlwaysLong { target_mult: 0.5 }),
                Box::new(AlwaysLong { target_mult: 3.0 }),
            ],
        );

        let signal = evaluator.evaluate(&ctx).unwrap();
        assert!((signal.risk_reward - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_danger_regime_blocks_all_detectors() {
        let candles = flat_candles(30);
        let snapshot = base_snapshot();
        let mut regime = base_regime();
        regime.volatility = Volatility::Extreme;
        regime.permission = TradePermission::Danger;
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        let mut evaluator = StrategyEvaluator::with_detectors(
            params(),
            vec![Box::new(AlwaysLong { target_mult: 2.0 })],
        );
        assert!(evaluator.evaluate(&ctx).is_none());
    }

    #[test]
    fn test_cooldown_blocks_until_enough_candles_elapse() {
        let candles = flat_candles(30);
        let snapshot = base_snapshot();
        let regime = base_regime();

        let mut evaluator = StrategyEvaluator::with_detectors(
            StrategyParams {
                cooldown_candles: 2,
                ..params()
            },
            vec![Box::new(AlwaysLong { target_mult: 2.0 })],
        );

        let ctx = StrategyContext::new("BTCUSDT", &candles[..28], &snapshot, &regime);
        assert!(evaluator.evaluate(&ctx).is_some());

        // one candle elapsed, still inside the two-candle cooldown
        let ctx = StrategyContext::new("BTCUSDT", &candles[..29], &snapshot, &regime);
        assert!(evaluator.evaluate(&ctx).is_none());

        // two candles elapsed clears it
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);
        assert!(evaluator.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_cooldown_is_per_symbol() {
        let candles = flat_candles(30);
        let snapshot = base_snapshot();
        let regime = base_regime();

        let mut evaluator = StrategyEvaluator::with_detectors(
            params(),
            vec![Box::new(AlwaysLong { target_mult: 2.0 })],
        );

        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);
        assert!(evaluator.evaluate(&ctx).is_some());

        // a different symbol is unaffected by BTC's cooldown
        let ctx = StrategyContext::new("ETHUSDT", &candles, &snapshot, &regime);
        assert!(evaluator.evaluate(&ctx).is_some());
    }

    #[test]
    fn test_trend_bucket_helpers() {
        assert!(Trend::StrongUp.is_up());
        assert!(!Trend::Neutral.is_up());
        assert!(Trend::Down.is_down());
    }
}

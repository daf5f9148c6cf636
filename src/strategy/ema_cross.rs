use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use crate::indicators::{self, EMA_FAST, EMA_MID};
use crate::types::{Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const MIN_CANDLES: usize = EMA_MID + 2;
const STOP_ATR: f64 = 1.5;
const TARGET_ATR: f64 = 3.0;
const TREND_DX_MIN: f64 = 25.0;

/// Fast/mid EMA crossover confirmed on the just-closed candle.
///
/// The cross has to be fresh: the fast EMA must be on the other side of
/// the mid EMA when recomputed without the latest candle, so a persistent
/// stack does not keep firing bar after bar.
pub struct EmaCrossDetector;

impl Detector for EmaCrossDetector {
    fn name(&self) -> &'static str {
        "ema_cross"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }

        let closes: Vec<f64> = ctx
            .candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(0.0))
            .collect();
        let prev = &closes[..closes.len() - 1];
        let prev_fast = indicators::ema(prev, EMA_FAST);
        let prev_mid = indicators::ema(prev, EMA_MID);

        let fast = ctx.indicators.ema_9;
        let mid = ctx.indicators.ema_21;
        let adx = ctx.indicators.adx_14;

        let crossed_up = fast > mid && prev_fast <= prev_mid;
        let crossed_down = fast < mid && prev_fast >= prev_mid;

        let direction = if crossed_up {
            Direction::Long
        } else if crossed_down {
            Direction::Short
        } else {
            return None;
        };

        let aligned = match direction {
            Direction::Long => ctx.regime.trend.is_up(),
            Direction::Short => ctx.regime.trend.is_down(),
            Direction::Neutral => false,
        };
        let strength = if aligned && adx >= TREND_DX_MIN {
            SignalStrength::Strong
        } else {
            SignalStrength::Moderate
        };

        debug!(
            "{}: EMA {}/{} crossover {}",
            ctx.symbol,
            EMA_FAST,
            EMA_MID,
            direction.as_str()
        );

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "EMA{} crossed {} EMA{} ({:.2} vs {:.2}), DX {:.1}",
                EMA_FAST,
                if crossed_up { "above" } else { "below" },
                EMA_MID,
                fast,
                mid,
                adx
            ),
        })
    }
}

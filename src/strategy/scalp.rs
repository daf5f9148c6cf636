use crate::types::{Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const MIN_CANDLES: usize = 10;
const STOP_ATR: f64 = 0.8;
const TARGET_ATR: f64 = 1.4;

/// Last-resort scalp: the closed candle agrees with its side of the fast
/// EMA. Runs at the bottom of the priority chain, so it only fires when
/// every structured setup has passed on the tick. Drafts are always Weak.
pub struct QuickScalpDetector;

impl Detector for QuickScalpDetector {
    fn name(&self) -> &'static str {
        "quick_scalp"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let candle = ctx.last_candle()?;
        let ema_fast = ctx.indicators.ema_9;

        let direction = if candle.is_bullish() && ctx.price > ema_fast {
            Direction::Long
        } else if candle.is_bearish() && ctx.price < ema_fast {
            Direction::Short
        } else {
            return None;
        };

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength: SignalStrength::Weak,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "Scalp with the candle on the {} side of the 9 EMA",
                direction.as_str()
            ),
        })
    }
}

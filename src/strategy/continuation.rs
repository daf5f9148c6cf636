use crate::types::{Candle, Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const RUN_LENGTH: usize = 3;
const MIN_CANDLES: usize = 22;
const STOP_ATR: f64 = 1.0;
const TARGET_ATR: f64 = 1.8;

/// Three consecutive candles in the trend direction, above (or below) the
/// fast EMA and with the regime trend bucket confirming.
pub struct ContinuationDetector;

fn run_of(candles: &[Candle], bullish: bool) -> bool {
    candles.len() >= RUN_LENGTH
        && candles[candles.len() - RUN_LENGTH..]
            .iter()
            .all(|c| if bullish { c.is_bullish() } else { c.is_bearish() })
}

impl Detector for ContinuationDetector {
    fn name(&self) -> &'static str {
        "continuation"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let ema_fast = ctx.indicators.ema_9;

        let direction = if ctx.regime.trend.is_up()
            && run_of(ctx.candles, true)
            && ctx.price > ema_fast
        {
            Direction::Long
        } else if ctx.regime.trend.is_down()
            && run_of(ctx.candles, false)
            && ctx.price < ema_fast
        {
            Direction::Short
        } else {
            return None;
        };

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength: SignalStrength::Moderate,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "{} candles in a row with the {} trend",
                RUN_LENGTH,
                ctx.regime.trend.as_str()
            ),
        })
    }
}

use rust_decimal::prelude::ToPrimitive;

use crate::types::{Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const MIN_CANDLES: usize = 25;
const TOUCH_TOLERANCE: f64 = 0.002;
const RSI_BAND_LOW: f64 = 40.0;
const RSI_BAND_HIGH: f64 = 60.0;
const STOP_ATR: f64 = 1.2;
const TARGET_ATR: f64 = 2.2;

/// Pullback to the mid EMA inside an established trend.
///
/// In an uptrend the candle has to dip into the EMA band and close back
/// above it. RSI must sit in the neutral band: a pullback with RSI still
/// at an extreme is a reversal setup, not a bounce.
pub struct EmaBounceDetector;

impl Detector for EmaBounceDetector {
    fn name(&self) -> &'static str {
        "ema_bounce"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let rsi = ctx.indicators.rsi_14;
        if !(RSI_BAND_LOW..=RSI_BAND_HIGH).contains(&rsi) {
            return None;
        }

        let candle = ctx.last_candle()?;
        let low = candle.low.to_f64().unwrap_or(0.0);
        let high = candle.high.to_f64().unwrap_or(0.0);
        let ema_mid = ctx.indicators.ema_21;
        if ema_mid <= 0.0 {
            return None;
        }

        let touched_from_above = low <= ema_mid * (1.0 + TOUCH_TOLERANCE);
        let touched_from_below = high >= ema_mid * (1.0 - TOUCH_TOLERANCE);

        let direction = if ctx.regime.trend.is_up() && touched_from_above && ctx.price > ema_mid {
            Direction::Long
        } else if ctx.regime.trend.is_down() && touched_from_below && ctx.price < ema_mid {
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
                "Pullback held the 21 EMA at {:.2} in a {} trend",
                ema_mid,
                ctx.regime.trend.as_str()
            ),
        })
    }
}

use rust_decimal::prelude::ToPrimitive;

use crate::types::{Candle, Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const VOLUME_SURGE: f64 = 1.5;
const VOLUME_CLIMAX: f64 = 2.5;
const MIN_BODY_FRACTION: f64 = 0.6;
const MIN_CANDLES: usize = 21;
const STOP_ATR: f64 = 1.5;
const TARGET_ATR: f64 = 2.5;

/// Volume-backed momentum burst: a wide-bodied candle on well above average
/// volume, closing on the trend side of the fast EMA.
pub struct MomentumDetector;

fn body_fraction(candle: &Candle) -> f64 {
    let high = candle.high.to_f64().unwrap_or(0.0);
    let low = candle.low.to_f64().unwrap_or(0.0);
    let range = high - low;
    if range <= 0.0 {
        return 0.0;
    }
    let open = candle.open.to_f64().unwrap_or(0.0);
    let close = candle.close.to_f64().unwrap_or(0.0);
    (close - open).abs() / range
}

impl Detector for MomentumDetector {
    fn name(&self) -> &'static str {
        "momentum"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let candle = ctx.last_candle()?;
        let ratio = ctx.indicators.volume_ratio;

        if ratio < VOLUME_SURGE || body_fraction(candle) < MIN_BODY_FRACTION {
            return None;
        }

        let ema_fast = ctx.indicators.ema_9;
        let direction = if candle.is_bullish() && ctx.price > ema_fast {
            Direction::Long
        } else if candle.is_bearish() && ctx.price < ema_fast {
            Direction::Short
        } else {
            return None;
        };

        let strength = if ratio >= VOLUME_CLIMAX {
            SignalStrength::VeryStrong
        } else {
            SignalStrength::Strong
        };

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "Momentum candle on {:.1}x average volume, body {:.0}% of range",
                ratio,
                body_fraction(candle) * 100.0
            ),
        })
    }
}

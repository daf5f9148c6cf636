use crate::types::{Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const OVERSOLD: f64 = 35.0;
const OVERBOUGHT: f64 = 65.0;
const EXTREME_OVERSOLD: f64 = 25.0;
const EXTREME_OVERBOUGHT: f64 = 75.0;
const MIN_CANDLES: usize = 15;
const STOP_ATR: f64 = 1.2;
const TARGET_ATR: f64 = 2.0;

/// RSI stretched into oversold or overbought territory with a turn candle
/// closing against the stretch. The turn candle is required so the detector
/// waits for the first sign of a reversal instead of catching the knife.
pub struct RsiReversalDetector;

impl Detector for RsiReversalDetector {
    fn name(&self) -> &'static str {
        "rsi_reversal"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let candle = ctx.last_candle()?;
        let rsi = ctx.indicators.rsi_14;

        let (direction, strength) = if rsi < OVERSOLD && candle.is_bullish() {
            let strength = if rsi < EXTREME_OVERSOLD {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (Direction::Long, strength)
        } else if rsi > OVERBOUGHT && candle.is_bearish() {
            let strength = if rsi > EXTREME_OVERBOUGHT {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (Direction::Short, strength)
        } else {
            return None;
        };

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "RSI {:.1} {} with a {} turn candle",
                rsi,
                if direction == Direction::Long {
                    "oversold"
                } else {
                    "overbought"
                },
                if direction == Direction::Long {
                    "bullish"
                } else {
                    "bearish"
                },
            ),
        })
    }
}

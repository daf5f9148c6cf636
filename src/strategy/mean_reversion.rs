use crate::types::{Direction, SignalStrength};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const MIN_CANDLES: usize = 51;
const STRETCH_ATR: f64 = 2.0;
const RSI_LONG_MAX: f64 = 30.0;
const RSI_SHORT_MIN: f64 = 70.0;
const RSI_EXTREME_LONG: f64 = 20.0;
const RSI_EXTREME_SHORT: f64 = 80.0;
const STOP_ATR: f64 = 1.5;
const TARGET_ATR: f64 = 2.0;

/// Price stretched more than two ATRs from the slow EMA with RSI at an
/// extreme and a turn candle. Targets the snap back toward the mean, not
/// a trend ride.
pub struct MeanReversionDetector;

impl Detector for MeanReversionDetector {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        let atr = ctx.indicators.atr_14;
        if ctx.candles.len() < MIN_CANDLES || atr <= 0.0 {
            return None;
        }
        let candle = ctx.last_candle()?;
        let stretch = (ctx.price - ctx.indicators.ema_50) / atr;
        let rsi = ctx.indicators.rsi_14;

        let (direction, strength) = if stretch <= -STRETCH_ATR
            && rsi < RSI_LONG_MAX
            && candle.is_bullish()
        {
            let strength = if rsi < RSI_EXTREME_LONG {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (Direction::Long, strength)
        } else if stretch >= STRETCH_ATR && rsi > RSI_SHORT_MIN && candle.is_bearish() {
            let strength = if rsi > RSI_EXTREME_SHORT {
                SignalStrength::Strong
            } else {
                SignalStrength::Moderate
            };
            (Direction::Short, strength)
        } else {
            return None;
        };

        let (stop, target) = atr_levels(direction, ctx.price, atr, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "Price {:.1} ATRs {} the 50 EMA with RSI {:.1}",
                stretch.abs(),
                if direction == Direction::Long {
                    "below"
                } else {
                    "above"
                },
                rsi
            ),
        })
    }
}

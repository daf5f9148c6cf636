use crate::types::{Direction, SignalStrength, Trend};

use super::{atr_levels, Detector, SignalDraft, StrategyContext};

const MIN_CANDLES: usize = 25;
const STOP_ATR: f64 = 1.8;
const TARGET_ATR: f64 = 3.0;
const RSI_LONG_MAX: f64 = 70.0;
const RSI_SHORT_MIN: f64 = 30.0;

/// Close through the most recent swing pivot.
///
/// The previous close must still be on the old side of the level so only
/// the breakout candle itself fires. The mid EMA has to agree with the
/// break direction, and RSI must not already be pinned at the extreme the
/// trade would ride into.
pub struct StructureBreakDetector;

impl Detector for StructureBreakDetector {
    fn name(&self) -> &'static str {
        "structure_break"
    }

    fn evaluate(&self, ctx: &StrategyContext) -> Option<SignalDraft> {
        if ctx.candles.len() < MIN_CANDLES || ctx.indicators.atr_14 <= 0.0 {
            return None;
        }
        let swing_high = ctx.indicators.swing_high;
        let swing_low = ctx.indicators.swing_low;
        let rsi = ctx.indicators.rsi_14;
        let ema_mid = ctx.indicators.ema_21;

        let broke_up = swing_high > 0.0
            && ctx.price > swing_high
            && ctx.prev_close <= swing_high
            && ctx.price > ema_mid
            && rsi < RSI_LONG_MAX;
        let broke_down = swing_low > 0.0
            && ctx.price < swing_low
            && ctx.prev_close >= swing_low
            && ctx.price < ema_mid
            && rsi > RSI_SHORT_MIN;

        let (direction, level) = if broke_up {
            (Direction::Long, swing_high)
        } else if broke_down {
            (Direction::Short, swing_low)
        } else {
            return None;
        };

        let strength = match (direction, ctx.regime.trend) {
            (Direction::Long, Trend::StrongUp) | (Direction::Short, Trend::StrongDown) => {
                SignalStrength::VeryStrong
            }
            _ => SignalStrength::Strong,
        };

        let (stop, target) = atr_levels(direction, ctx.price, ctx.indicators.atr_14, STOP_ATR, TARGET_ATR);
        Some(SignalDraft {
            direction,
            strength,
            entry: ctx.price,
            stop,
            target,
            reason: format!(
                "Close {:.2} broke {} swing {} at {:.2}",
                ctx.price,
                if direction == Direction::Long {
                    "above"
                } else {
                    "below"
                },
                if direction == Direction::Long {
                    "high"
                } else {
                    "low"
                },
                level
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::testkit::*;

    #[test]
    fn test_breakout_candle_goes_long() {
        let mut candles = flat_candles(30);
        // prev close 100 sits below the 110 swing high, breakout closes above
        candles.push(candle(30, 109.0, 111.5, 108.5, 111.0, 1800.0));
        let mut snapshot = base_snapshot();
        snapshot.swing_high = 110.0;
        snapshot.ema_21 = 104.0;
        snapshot.rsi_14 = 62.0;
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        let draft = StructureBreakDetector.evaluate(&ctx).unwrap();
        assert_eq!(draft.direction, Direction::Long);
        assert_eq!(draft.strength, SignalStrength::Strong);
    }

    #[test]
    fn test_strong_trend_upgrades_strength() {
        let mut candles = flat_candles(30);
        candles.push(candle(30, 109.0, 111.5, 108.5, 111.0, 1800.0));
        let mut snapshot = base_snapshot();
        snapshot.swing_high = 110.0;
        snapshot.ema_21 = 104.0;
        snapshot.rsi_14 = 62.0;
        let mut regime = base_regime();
        regime.trend = Trend::StrongUp;
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        let draft = StructureBreakDetector.evaluate(&ctx).unwrap();
        assert_eq!(draft.strength, SignalStrength::VeryStrong);
    }

    #[test]
    fn test_second_candle_past_the_level_does_not_refire() {
        let mut candles = flat_candles(29);
        // both the previous close and the current close are beyond the level
        candles.push(candle(29, 110.5, 112.0, 110.0, 111.0, 1500.0));
        candles.push(candle(30, 111.0, 113.0, 110.5, 112.5, 1500.0));
        let mut snapshot = base_snapshot();
        snapshot.swing_high = 110.0;
        snapshot.ema_21 = 104.0;
        snapshot.rsi_14 = 62.0;
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        assert!(StructureBreakDetector.evaluate(&ctx).is_none());
    }

    #[test]
    fn test_breakdown_candle_goes_short() {
        let mut candles = flat_candles(30);
        candles.push(candle(30, 91.0, 91.5, 88.5, 89.0, 1800.0));
        let mut snapshot = base_snapshot();
        snapshot.swing_low = 90.0;
        snapshot.ema_21 = 96.0;
        snapshot.rsi_14 = 40.0;
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        let draft = StructureBreakDetector.evaluate(&ctx).unwrap();
        assert_eq!(draft.direction, Direction::Short);
    }

    #[test]
    fn test_overbought_breakout_stays_out() {
        let mut candles = flat_candles(30);
        candles.push(candle(30, 109.0, 111.5, 108.5, 111.0, 1800.0));
        let mut snapshot = base_snapshot();
        snapshot.swing_high = 110.0;
        snapshot.ema_21 = 104.0;
        snapshot.rsi_14 = 78.0;
        let regime = base_regime();
        let ctx = StrategyContext::new("BTCUSDT", &candles, &snapshot, &regime);

        assert!(StructureBreakDetector.evaluate(&ctx).is_none());
    }
}

//! Indicator calculations
//!
//! Pure functions over candle slices; no I/O and no stored state. Every
//! function degrades to a documented default on short input instead of
//! erroring, so the pipeline keeps ticking while history fills:
//! EMA falls back to the last value (0 when empty), RSI to 50, ATR/ADX
//! to 0, and the volume ratio to 1.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;

use crate::types::{Candle, IndicatorSnapshot};

pub const EMA_FAST: usize = 9;
pub const EMA_MID: usize = 21;
pub const EMA_SLOW: usize = 50;
pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const VOLUME_PERIOD: usize = 20;

/// Candles on each side a pivot must dominate
pub const SWING_WINDOW: usize = 2;
/// Fallback window when no pivot exists
pub const SWING_LOOKBACK: usize = 20;

pub struct IndicatorEngine;

impl IndicatorEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute every indicator for one symbol. Never fails; short input
    /// produces the per-indicator defaults.
    pub fn compute(&self, symbol: &str, candles: &[Candle]) -> IndicatorSnapshot {
        let closes: Vec<f64> = candles
            .iter()
            .map(|c| c.close.to_f64().unwrap_or(0.0))
            .collect();
        let volumes: Vec<f64> = candles
            .iter()
            .map(|c| c.volume.to_f64().unwrap_or(0.0))
            .collect();

        let last_close = closes.last().copied().unwrap_or(0.0);
        let atr_14 = atr(candles, ATR_PERIOD);
        let atr_pct = if last_close > 0.0 {
            atr_14 / last_close * 100.0
        } else {
            0.0
        };

        let vol_sma = volume_sma(&volumes, VOLUME_PERIOD);
        let volume_ratio = match (volumes.last(), vol_sma > 0.0) {
            (Some(&latest), true) => latest / vol_sma,
            _ => 1.0,
        };

        IndicatorSnapshot {
            symbol: symbol.to_string(),
            timestamp: candles.last().map(|c| c.close_time).unwrap_or_else(Utc::now),
            ema_9: ema(&closes, EMA_FAST),
            ema_21: ema(&closes, EMA_MID),
            ema_50: ema(&closes, EMA_SLOW),
            rsi_14: rsi(&closes, RSI_PERIOD),
            atr_14,
            atr_pct,
            adx_14: adx(candles, ADX_PERIOD),
            volume_sma_20: vol_sma,
            volume_ratio,
            swing_high: swing_high(candles, SWING_WINDOW),
            swing_low: swing_low(candles, SWING_WINDOW),
        }
    }
}

impl Default for IndicatorEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Exponential moving average: SMA seed over the first `period` values,
/// then the standard recurrence over the rest
pub fn ema(values: &[f64], period: usize) -> f64 {
    if values.is_empty() || period == 0 {
        return 0.0;
    }
    if values.len() < period {
        return values[values.len() - 1];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = values.iter().take(period).sum::<f64>() / period as f64;
    for value in values.iter().skip(period) {
        ema = (value - ema) * multiplier + ema;
    }
    ema
}

/// Wilder RSI; 50 until `period + 1` closes exist, 100 when there are no
/// losses in the series
pub fn rsi(closes: &[f64], period: usize) -> f64 {
    if period == 0 || closes.len() < period + 1 {
        return 50.0;
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        if change >= 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(-change);
        }
    }

    // seed with simple means, then Wilder's recurrence
    let mut avg_gain = gains.iter().take(period).sum::<f64>() / period as f64;
    let mut avg_loss = losses.iter().take(period).sum::<f64>() / period as f64;
    for i in period..gains.len() {
        avg_gain = (avg_gain * (period as f64 - 1.0) + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + losses[i]) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// True range of one candle against the previous close
fn true_range(current: &Candle, previous: &Candle) -> f64 {
    let high = current.high.to_f64().unwrap_or(0.0);
    let low = current.low.to_f64().unwrap_or(0.0);
    let prev_close = previous.close.to_f64().unwrap_or(0.0);

    (high - low)
        .max((high - prev_close).abs())
        .max((low - prev_close).abs())
}

/// Wilder-smoothed average true range; 0 until `period + 1` candles exist
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }

    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| true_range(&pair[1], &pair[0]))
        .collect();

    let mut atr = ranges.iter().take(period).sum::<f64>() / period as f64;
    for tr in ranges.iter().skip(period) {
        atr = (atr * (period as f64 - 1.0) + tr) / period as f64;
    }
    atr
}

/// Directional index. Smooths TR and ±DM with Wilder's recurrence and
/// reports the latest DX rather than a smoothed ADX; downstream trend
/// thresholds are tuned against this faster-moving series.
pub fn adx(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }

    let mut trs = Vec::with_capacity(candles.len() - 1);
    let mut dm_plus = Vec::with_capacity(candles.len() - 1);
    let mut dm_minus = Vec::with_capacity(candles.len() - 1);

    for pair in candles.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        trs.push(true_range(current, previous));

        let up_move = (current.high - previous.high).to_f64().unwrap_or(0.0);
        let down_move = (previous.low - current.low).to_f64().unwrap_or(0.0);
        dm_plus.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        dm_minus.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
    }

    let smooth = |series: &[f64]| -> f64 {
        let mut value = series.iter().take(period).sum::<f64>() / period as f64;
        for x in series.iter().skip(period) {
            value = (value * (period as f64 - 1.0) + x) / period as f64;
        }
        value
    };

    let tr_smooth = smooth(&trs);
    if tr_smooth == 0.0 {
        return 0.0;
    }

    let di_plus = smooth(&dm_plus) / tr_smooth * 100.0;
    let di_minus = smooth(&dm_minus) / tr_smooth * 100.0;
    if di_plus + di_minus == 0.0 {
        return 0.0;
    }
    (di_plus - di_minus).abs() / (di_plus + di_minus) * 100.0
}

/// Mean volume of up to `period` candles before the latest one
pub fn volume_sma(volumes: &[f64], period: usize) -> f64 {
    if volumes.len() < 2 || period == 0 {
        return 0.0;
    }
    let take = period.min(volumes.len() - 1);
    volumes.iter().rev().skip(1).take(take).sum::<f64>() / take as f64
}

/// Most recent pivot high: strictly above every high within `window`
/// candles on both sides. Falls back to the recent window extreme.
pub fn swing_high(candles: &[Candle], window: usize) -> f64 {
    let highs: Vec<f64> = candles
        .iter()
        .map(|c| c.high.to_f64().unwrap_or(0.0))
        .collect();
    find_pivot(&highs, window, true)
}

/// Most recent pivot low, symmetric to [`swing_high`]
pub fn swing_low(candles: &[Candle], window: usize) -> f64 {
    let lows: Vec<f64> = candles
        .iter()
        .map(|c| c.low.to_f64().unwrap_or(0.0))
        .collect();
    find_pivot(&lows, window, false)
}

fn find_pivot(values: &[f64], window: usize, high: bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() > window * 2 {
        // newest eligible pivot first
        for i in (window..values.len() - window).rev() {
            let candidate = values[i];
            let dominates = (i - window..i)
                .chain(i + 1..=i + window)
                .all(|j| {
                    if high {
                        candidate > values[j]
                    } else {
                        candidate < values[j]
                    }
                });
            if dominates {
                return candidate;
            }
        }
    }

    let tail = &values[values.len().saturating_sub(SWING_LOOKBACK)..];
    tail.iter().fold(
        if high { f64::MIN } else { f64::MAX },
        |acc, &v| if high { acc.max(v) } else { acc.min(v) },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn make_candle(i: i64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        let open_time = Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap();
        Candle {
            symbol: "BTCUSDT".to_string(),
            interval: crate::types::Interval::Minute5,
            open_time,
            close_time: open_time + chrono::Duration::seconds(299),
            open: Decimal::try_from(close).unwrap(),
            high: Decimal::try_from(high).unwrap(),
            low: Decimal::try_from(low).unwrap(),
            close: Decimal::try_from(close).unwrap(),
            volume: Decimal::try_from(volume).unwrap(),
            closed: true,
        }
    }

    #[test]
    fn test_ema_matches_reference_recurrence() {
        // SMA(1,2,3) = 2, k = 0.5: +4 -> 3, +5 -> 4
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((ema(&values, 3) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_short_input_falls_back_to_last_value() {
        assert_eq!(ema(&[5.0, 7.0], 3), 7.0);
        assert_eq!(ema(&[], 3), 0.0);
    }

    #[test]
    fn test_rsi_defaults_to_midpoint_on_short_input() {
        assert_eq!(rsi(&[100.0, 101.0, 102.0], 14), 50.0);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, 14), 100.0);
    }

    #[test]
    fn test_rsi_stays_bounded() {
        let closes: Vec<f64> = (0..40)
            .map(|i| 100.0 + if i % 2 == 0 { 3.0 } else { -2.0 } * (i as f64 % 5.0))
            .collect();
        let value = rsi(&closes, 14);
        assert!((0.0..=100.0).contains(&value), "rsi out of bounds: {}", value);
    }

    #[test]
    fn test_atr_constant_range() {
        // every candle spans 2.0 around an unchanged close
        let candles: Vec<Candle> = (0..20)
            .map(|i| make_candle(i, 101.0, 99.0, 100.0, 1000.0))
            .collect();
        assert!((atr(&candles, 14) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_short_input_is_zero() {
        let candles: Vec<Candle> = (0..10)
            .map(|i| make_candle(i, 101.0, 99.0, 100.0, 1000.0))
            .collect();
        assert_eq!(atr(&candles, 14), 0.0);
    }

    #[test]
    fn test_adx_pure_uptrend_is_100() {
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 2.0;
                make_candle(i, base + 1.0, base - 1.0, base, 1000.0)
            })
            .collect();
        assert!((adx(&candles, 14) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_ratio_spike() {
        let mut candles: Vec<Candle> = (0..25)
            .map(|i| make_candle(i, 101.0, 99.0, 100.0, 1000.0))
            .collect();
        candles.push(make_candle(25, 101.0, 99.0, 100.0, 2000.0));

        let engine = IndicatorEngine::new();
        let snapshot = engine.compute("BTCUSDT", &candles);
        assert!((snapshot.volume_ratio - 2.0).abs() < 1e-9);
        assert!((snapshot.volume_sma_20 - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_swing_pivot_detection() {
        let mut candles: Vec<Candle> = (0..10)
            .map(|i| make_candle(i, 101.0, 99.0, 100.0, 1000.0))
            .collect();
        // pivot high at index 10, dominated on both sides
        candles.push(make_candle(10, 110.0, 99.0, 100.0, 1000.0));
        candles.extend((11..16).map(|i| make_candle(i, 101.0, 99.0, 100.0, 1000.0)));

        assert_eq!(swing_high(&candles, SWING_WINDOW), 110.0);
        assert_eq!(swing_low(&candles, SWING_WINDOW), 99.0);
    }

    #[test]
    fn test_swing_falls_back_to_window_extreme() {
        // monotone highs have no pivot; the fallback is the recent max
        let candles: Vec<Candle> = (0..15)
            .map(|i| make_candle(i, 100.0 + i as f64, 90.0 + i as f64, 95.0, 1000.0))
            .collect();
        assert_eq!(swing_high(&candles, SWING_WINDOW), 114.0);
    }

    #[test]
    fn test_compute_on_empty_slice_uses_defaults() {
        let engine = IndicatorEngine::new();
        let snapshot = engine.compute("BTCUSDT", &[]);
        assert_eq!(snapshot.rsi_14, 50.0);
        assert_eq!(snapshot.volume_ratio, 1.0);
        assert_eq!(snapshot.ema_9, 0.0);
        assert_eq!(snapshot.atr_14, 0.0);
        assert_eq!(snapshot.adx_14, 0.0);
    }
}

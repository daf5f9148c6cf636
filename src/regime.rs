//! Market regime classification
//!
//! Buckets each symbol's volatility and trend from the indicator snapshot
//! and decides whether new entries are allowed at all. The only forbidden
//! combination is extreme volatility during extreme fear; everything else
//! trades and the strategy layer grades quality from there.

use crate::types::{
    IndicatorSnapshot, RegimeState, SentimentSnapshot, TradePermission, Trend, Volatility,
};

/// ATR% cut points, ascending
const ATR_PCT_LOW_MAX: f64 = 0.5;
const ATR_PCT_NORMAL_MAX: f64 = 1.5;
const ATR_PCT_HIGH_MAX: f64 = 3.0;

/// DX needed before a full EMA stack counts as a strong trend
const ADX_TREND_MIN: f64 = 25.0;
/// Below this DX the market is treated as directionless
const ADX_FLOOR: f64 = 15.0;

/// EMA9/EMA21 relative gap under which the trend is flat
const EMA_NEUTRAL_TOLERANCE: f64 = 0.001;

/// Fear & Greed scores at or below this are the extreme-fear band
const EXTREME_FEAR_MAX: f64 = 20.0;

pub struct RegimeClassifier;

impl RegimeClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(
        &self,
        snapshot: &IndicatorSnapshot,
        sentiment: &SentimentSnapshot,
        price: f64,
    ) -> RegimeState {
        let volatility = classify_volatility(snapshot.atr_pct);
        let trend = classify_trend(price, snapshot);
        let permission = if volatility == Volatility::Extreme
            && sentiment.score <= EXTREME_FEAR_MAX
        {
            TradePermission::Danger
        } else {
            TradePermission::Trade
        };

        let summary = format!(
            "{} volatility (ATR {:.2}%), {} trend (DX {:.1}), RSI {:.1}, sentiment {:.0} ({}) -> {}",
            volatility.as_str(),
            snapshot.atr_pct,
            trend.as_str(),
            snapshot.adx_14,
            snapshot.rsi_14,
            sentiment.score,
            sentiment.label,
            match permission {
                TradePermission::Trade => "trading allowed",
                TradePermission::Danger => "no new entries",
            }
        );

        RegimeState {
            symbol: snapshot.symbol.clone(),
            volatility,
            trend,
            permission,
            sentiment_score: sentiment.score,
            sentiment_label: sentiment.label.clone(),
            summary,
            updated_at: snapshot.timestamp,
        }
    }
}

impl Default for RegimeClassifier {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_volatility(atr_pct: f64) -> Volatility {
    if atr_pct < ATR_PCT_LOW_MAX {
        Volatility::Low
    } else if atr_pct < ATR_PCT_NORMAL_MAX {
        Volatility::Normal
    } else if atr_pct < ATR_PCT_HIGH_MAX {
        Volatility::High
    } else {
        Volatility::Extreme
    }
}

fn classify_trend(price: f64, s: &IndicatorSnapshot) -> Trend {
    // flat EMAs or a dead DX override everything else
    if s.ema_21 > 0.0 && ((s.ema_9 - s.ema_21) / s.ema_21).abs() <= EMA_NEUTRAL_TOLERANCE {
        return Trend::Neutral;
    }
    if s.adx_14 < ADX_FLOOR {
        return Trend::Neutral;
    }

    let stacked_up = price > s.ema_9 && s.ema_9 > s.ema_21 && s.ema_21 > s.ema_50;
    let stacked_down = price < s.ema_9 && s.ema_9 < s.ema_21 && s.ema_21 < s.ema_50;

    if stacked_up && s.adx_14 >= ADX_TREND_MIN {
        Trend::StrongUp
    } else if stacked_down && s.adx_14 >= ADX_TREND_MIN {
        Trend::StrongDown
    } else if price > s.ema_21 && s.ema_9 > s.ema_21 {
        Trend::Up
    } else if price < s.ema_21 && s.ema_9 < s.ema_21 {
        Trend::Down
    } else {
        Trend::Neutral
    }
}

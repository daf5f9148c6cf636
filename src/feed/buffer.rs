//! Per-symbol candle ring buffer
//!
//! Closed candles append once per open time, the forming candle replaces
//! in place, and the oldest candle falls off at capacity. Both feed paths
//! (websocket push and REST poll) funnel through [`CandleBuffer::apply`],
//! which is where duplicate closed candles are dropped.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::types::Candle;

pub struct CandleBuffer {
    candles: VecDeque<Candle>,
    capacity: usize,
    /// Open time of the newest closed candle accepted so far
    last_closed_open: Option<DateTime<Utc>>,
}

impl CandleBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            candles: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            last_closed_open: None,
        }
    }

    /// Seed with historical candles (bootstrap); nothing is dispatched
    pub fn seed(&mut self, mut candles: Vec<Candle>) {
        candles.sort_by_key(|c| c.open_time);
        for candle in candles {
            if !candle.closed {
                continue;
            }
            if self.is_stale(candle.open_time) {
                continue;
            }
            self.last_closed_open = Some(candle.open_time);
            self.push_fresh(candle);
        }
    }

    /// Apply a feed update. Returns the candle when it completed a new
    /// period, i.e. exactly once per (symbol, open_time); duplicates and
    /// stale arrivals return None.
    pub fn apply(&mut self, candle: Candle) -> Option<Candle> {
        if candle.closed {
            if self.is_stale(candle.open_time) {
                return None;
            }
            self.last_closed_open = Some(candle.open_time);
            match self.candles.back_mut() {
                // the forming candle graduates in place
                Some(last) if last.open_time == candle.open_time && !last.closed => {
                    *last = candle.clone();
                }
                _ => self.push_fresh(candle.clone()),
            }
            Some(candle)
        } else {
            match self.candles.back_mut() {
                Some(last) if last.open_time == candle.open_time => {
                    // live refresh; a closed candle never regresses to forming
                    if !last.closed {
                        *last = candle;
                    }
                    None
                }
                Some(last) if candle.open_time < last.open_time => None,
                _ => {
                    self.push_fresh(candle);
                    None
                }
            }
        }
    }

    /// The most recent `n` closed candles, oldest first
    pub fn recent(&self, n: usize) -> Vec<Candle> {
        let mut out: Vec<Candle> = self
            .candles
            .iter()
            .filter(|c| c.closed)
            .rev()
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Close of the newest candle, forming or not
    pub fn latest_price(&self) -> Option<Decimal> {
        self.candles.back().map(|c| c.close)
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn is_stale(&self, open_time: DateTime<Utc>) -> bool {
        matches!(self.last_closed_open, Some(watermark) if open_time <= watermark)
    }

    /// Push a candle for a new period, discarding a forming candle whose
    /// close never arrived. At most the back of the ring is unclosed.
    fn push_fresh(&mut self, candle: Candle) {
        if matches!(self.candles.back(), Some(last) if !last.closed) {
            self.candles.pop_back();
        }
        if self.candles.len() == self.capacity {
            self.candles.pop_front();
        }
        self.candles.push_back(candle);
    }
}

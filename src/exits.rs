//! Exit decisions for open positions
//!
//! Take profit and stop loss come from the signal; the trailing stop is
//! managed here. A trail arms once price moves a configured fraction in
//! the position's favor and then ratchets behind the best price seen.
//! The stop level only ever tightens. When several exit conditions hold
//! on the same tick the order is take profit, trailing stop, stop loss.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::ExitParams;
use crate::portfolio::Position;
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    TrailingStop,
    StopLoss,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::StopLoss => "stop_loss",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrailingStopState {
    pub armed: bool,
    /// Best price seen since arming, in the position's favor
    pub extreme_price: Decimal,
    pub stop_level: Option<Decimal>,
}

impl TrailingStopState {
    fn new(position: &Position) -> Self {
        Self {
            armed: false,
            extreme_price: position.entry_price,
            stop_level: None,
        }
    }
}

pub struct ExitManager {
    params: ExitParams,
    trails: HashMap<Uuid, TrailingStopState>,
}

impl ExitManager {
    pub fn new(params: ExitParams) -> Self {
        Self {
            params,
            trails: HashMap::new(),
        }
    }

    /// Start managing a freshly opened position.
    pub fn track(&mut self, position: &Position) {
        self.trails
            .insert(position.id, TrailingStopState::new(position));
    }

    /// Forget a closed position.
    pub fn release(&mut self, id: Uuid) {
        self.trails.remove(&id);
    }

    pub fn trail(&self, id: Uuid) -> Option<&TrailingStopState> {
        self.trails.get(&id)
    }

    /// Advance the trailing state for the tick price, then decide whether
    /// the position should close and for which reason.
    pub fn assess(&mut self, position: &Position, price: Decimal) -> Option<ExitReason> {
        if position.direction == Direction::Neutral {
            return None;
        }
        self.update_trail(position, price);

        let long = position.direction == Direction::Long;
        if position.take_profit > Decimal::ZERO {
            let hit = if long {
                price >= position.take_profit
            } else {
                price <= position.take_profit
            };
            if hit {
                return Some(ExitReason::TakeProfit);
            }
        }
        if let Some(stop) = self.trails.get(&position.id).and_then(|t| t.stop_level) {
            let hit = if long { price <= stop } else { price >= stop };
            if hit {
                return Some(ExitReason::TrailingStop);
            }
        }
        if position.stop_loss > Decimal::ZERO {
            let hit = if long {
                price <= position.stop_loss
            } else {
                price >= position.stop_loss
            };
            if hit {
                return Some(ExitReason::StopLoss);
            }
        }
        None
    }

    fn update_trail(&mut self, position: &Position, price: Decimal) {
        let long = position.direction == Direction::Long;
        let state = self
            .trails
            .entry(position.id)
            .or_insert_with(|| TrailingStopState::new(position));

        if !state.armed {
            let activation = if long {
                position.entry_price * (Decimal::ONE + self.params.trailing_activation_pct)
            } else {
                position.entry_price * (Decimal::ONE - self.params.trailing_activation_pct)
            };
            let reached = if long {
                price >= activation
            } else {
                price <= activation
            };
            if !reached {
                return;
            }
            state.armed = true;
            state.extreme_price = price;
            debug!(
                "{}: trailing stop armed at {} (entry {})",
                position.symbol, price, position.entry_price
            );
        }

        if long {
            if price > state.extreme_price {
                state.extreme_price = price;
            }
        } else if price < state.extreme_price {
            state.extreme_price = price;
        }

        let candidate = if long {
            state.extreme_price * (Decimal::ONE - self.params.trailing_distance_pct)
        } else {
            state.extreme_price * (Decimal::ONE + self.params.trailing_distance_pct)
        };
        state.stop_level = Some(match state.stop_level {
            None => candidate,
            // ratchet: a long stop only rises, a short stop only falls
            Some(current) if long => current.max(candidate),
            Some(current) => current.min(candidate),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn exit_params() -> ExitParams {
        ExitParams {
            trailing_activation_pct: Decimal::new(15, 3),
            trailing_distance_pct: Decimal::new(1, 2),
        }
    }

    fn position(direction: Direction, entry: i64, stop: i64, target: i64) -> Position {
        Position {
            id: Uuid::new_v4(),
            signal_id: Uuid::new_v4(),
            symbol: "BTCUSDT".to_string(),
            direction,
            entry_price: Decimal::new(entry, 0),
            quantity: Decimal::ONE,
            stop_loss: Decimal::new(stop, 0),
            take_profit: Decimal::new(target, 0),
            current_price: Decimal::new(entry, 0),
            unrealized_pnl: Decimal::ZERO,
            unrealized_pnl_pct: Decimal::ZERO,
            entry_commission: Decimal::ZERO,
            opened_at: Utc::now(),
            strategy: "test".to_string(),
        }
    }

    fn dec(value: &str) -> Decimal {
        value.parse().unwrap()
    }

    #[test]
    fn test_trail_arms_only_after_activation_move() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);

        assert!(exits.assess(&pos, dec("101.0")).is_none());
        assert!(!exits.trail(pos.id).unwrap().armed);

        // 1.5% above entry reaches the activation threshold exactly
        assert!(exits.assess(&pos, dec("101.5")).is_none());
        let trail = exits.trail(pos.id).unwrap();
        assert!(trail.armed);
        assert_eq!(trail.stop_level, Some(dec("100.485")));
    }

    #[test]
    fn test_ratchet_never_loosens() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);

        assert!(exits.assess(&pos, dec("102.0")).is_none());
        assert_eq!(exits.trail(pos.id).unwrap().stop_level, Some(dec("100.98")));

        // pullback produces a looser candidate, the stop must hold
        assert!(exits.assess(&pos, dec("101.6")).is_none());
        assert_eq!(exits.trail(pos.id).unwrap().stop_level, Some(dec("100.98")));

        // new high tightens it again
        assert!(exits.assess(&pos, dec("103.0")).is_none());
        assert_eq!(exits.trail(pos.id).unwrap().stop_level, Some(dec("101.97")));
    }

    #[test]
    fn test_trailing_stop_fires_on_giveback() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);

        assert!(exits.assess(&pos, dec("103.0")).is_none());
        assert_eq!(
            exits.assess(&pos, dec("101.9")),
            Some(ExitReason::TrailingStop)
        );
    }

    #[test]
    fn test_take_profit_reported_over_trailing() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 104);
        exits.track(&pos);

        // single tick arms the trail and crosses the target
        assert_eq!(exits.assess(&pos, dec("104.5")), Some(ExitReason::TakeProfit));
    }

    #[test]
    fn test_trailing_reported_over_stop_loss_on_gap() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);

        assert!(exits.assess(&pos, dec("103.0")).is_none());
        // gap through both the trail at 101.97 and the hard stop at 95
        assert_eq!(
            exits.assess(&pos, dec("94.0")),
            Some(ExitReason::TrailingStop)
        );
    }

    #[test]
    fn test_stop_loss_fires_without_armed_trail() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);

        assert_eq!(exits.assess(&pos, dec("94.5")), Some(ExitReason::StopLoss));
    }

    #[test]
    fn test_short_trail_ratchets_downward() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Short, 100, 105, 80);
        exits.track(&pos);

        // 1.5% below entry arms the trail
        assert!(exits.assess(&pos, dec("98.0")).is_none());
        assert_eq!(exits.trail(pos.id).unwrap().stop_level, Some(dec("98.98")));

        assert!(exits.assess(&pos, dec("96.0")).is_none());
        assert_eq!(exits.trail(pos.id).unwrap().stop_level, Some(dec("96.96")));

        // bounce above the trail closes the short
        assert_eq!(
            exits.assess(&pos, dec("97.0")),
            Some(ExitReason::TrailingStop)
        );
    }

    #[test]
    fn test_release_forgets_the_trail() {
        let mut exits = ExitManager::new(exit_params());
        let pos = position(Direction::Long, 100, 95, 130);
        exits.track(&pos);
        assert!(exits.assess(&pos, dec("103.0")).is_none());

        exits.release(pos.id);
        assert!(exits.trail(pos.id).is_none());
    }
}

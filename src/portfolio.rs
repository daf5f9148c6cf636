//! Paper portfolio with risk-fraction sizing
//!
//! All money math is `Decimal`. Equity is recomputed after every mutation
//! as cash plus the marked value of open positions, so the identity
//! `equity == cash + sum(quantity * current_price)` holds at every
//! observable point. Closed trades are append only.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RiskParams;
use crate::types::{Direction, TradeSignal};

const QUANTITY_DP: u32 = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    /// Signal that opened the position
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub current_price: Decimal,
    pub unrealized_pnl: Decimal,
    /// Unrealized P&L as a percent of the entry notional
    pub unrealized_pnl_pct: Decimal,
    pub entry_commission: Decimal,
    pub opened_at: DateTime<Utc>,
    pub strategy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeOutcome {
    Win,
    Loss,
    Breakeven,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub gross_pnl: Decimal,
    /// Both legs
    pub commission: Decimal,
    pub net_pnl: Decimal,
    pub outcome: TradeOutcome,
    pub exit_reason: String,
    pub strategy: String,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

/// Serializable view of the portfolio for the state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioState {
    pub initial_capital: Decimal,
    pub cash: Decimal,
    pub equity: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    /// Realized plus unrealized
    pub total_pnl: Decimal,
    /// Total P&L as a percent of initial capital
    pub total_pnl_pct: Decimal,
    pub open_positions: Vec<Position>,
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_commission: Decimal,
}

pub struct RiskPortfolio {
    params: RiskParams,
    cash: Decimal,
    equity: Decimal,
    positions: HashMap<Uuid, Position>,
    closed: Vec<ClosedTrade>,
}

impl RiskPortfolio {
    pub fn new(params: RiskParams) -> Self {
        Self {
            params,
            cash: params.initial_capital,
            equity: params.initial_capital,
            positions: HashMap::new(),
            closed: Vec::new(),
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn position(&self, id: Uuid) -> Option<&Position> {
        self.positions.get(&id)
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Room for another position: below the position cap and the cash
    /// reserve floor is still intact.
    pub fn can_open(&self) -> bool {
        self.positions.len() < self.params.max_open_positions
            && self.cash >= self.equity * self.params.min_cash_reserve_pct
    }

    /// Size and open a position from an approved signal at the fill price.
    /// Quantity risks `risk_per_trade` of equity against the stop distance,
    /// then is capped so the notional stays within `max_position_pct` of
    /// equity. Returns `None` when the signal cannot be sized or afforded.
    pub fn open(&mut self, signal: &TradeSignal, fill_price: Decimal) -> Option<Uuid> {
        if !self.can_open() {
            debug!("{}: portfolio full or reserve exhausted", signal.symbol);
            return None;
        }
        if signal.direction == Direction::Neutral || fill_price <= Decimal::ZERO {
            return None;
        }
        let stop_distance = (fill_price - signal.stop_loss).abs();
        if stop_distance <= Decimal::ZERO {
            debug!("{}: stop sits on the fill price, cannot size", signal.symbol);
            return None;
        }

        let risk_budget = self.equity * self.params.risk_per_trade;
        let mut quantity = (risk_budget / stop_distance).round_dp(QUANTITY_DP);
        let max_notional = self.equity * self.params.max_position_pct;
        if quantity * fill_price > max_notional {
            quantity = (max_notional / fill_price).round_dp(QUANTITY_DP);
        }
        if quantity <= Decimal::ZERO {
            return None;
        }

        let notional = quantity * fill_price;
        let fee = notional * self.params.commission_rate;
        if notional + fee > self.cash {
            debug!(
                "{}: notional {} plus fee {} exceeds cash {}",
                signal.symbol, notional, fee, self.cash
            );
            return None;
        }

        self.cash -= notional + fee;
        let position = Position {
            id: Uuid::new_v4(),
            signal_id: signal.id,
            symbol: signal.symbol.clone(),
            direction: signal.direction,
            entry_price: fill_price,
            quantity,
            stop_loss: signal.stop_loss,
            take_profit: signal.take_profit,
            current_price: fill_price,
            unrealized_pnl: -fee,
            unrealized_pnl_pct: pct_of(-fee, notional),
            entry_commission: fee,
            opened_at: signal.created_at,
            strategy: signal.strategy.clone(),
        };
        info!(
            "Opened {} {} qty {} @ {} (stop {}, target {}, fee {})",
            position.direction.as_str(),
            position.symbol,
            quantity,
            fill_price,
            position.stop_loss,
            position.take_profit,
            fee
        );
        let id = position.id;
        self.positions.insert(id, position);
        self.refresh_equity();
        Some(id)
    }

    /// Close a position at the exit price and record the trade.
    pub fn close(&mut self, id: Uuid, exit_price: Decimal, exit_reason: &str) -> Option<ClosedTrade> {
        let position = self.positions.remove(&id)?;
        let exit_notional = position.quantity * exit_price;
        let exit_fee = exit_notional * self.params.commission_rate;

        let gross_pnl = directional_pnl(
            position.direction,
            position.entry_price,
            exit_price,
            position.quantity,
        );
        let commission = position.entry_commission + exit_fee;
        let net_pnl = gross_pnl - commission;
        let outcome = if net_pnl > Decimal::ZERO {
            TradeOutcome::Win
        } else if net_pnl < Decimal::ZERO {
            TradeOutcome::Loss
        } else {
            TradeOutcome::Breakeven
        };

        self.cash += exit_notional - exit_fee;
        let trade = ClosedTrade {
            id: position.id,
            signal_id: position.signal_id,
            symbol: position.symbol,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            stop_loss: position.stop_loss,
            take_profit: position.take_profit,
            gross_pnl,
            commission,
            net_pnl,
            outcome,
            exit_reason: exit_reason.to_string(),
            strategy: position.strategy,
            opened_at: position.opened_at,
            closed_at: Utc::now(),
        };
        info!(
            "Closed {} {} @ {} ({}): net {} after {} commission",
            trade.direction.as_str(),
            trade.symbol,
            exit_price,
            exit_reason,
            net_pnl,
            commission
        );
        self.closed.push(trade.clone());
        self.refresh_equity();
        Some(trade)
    }

    /// Reprice open positions from the latest feed prices. Symbols without
    /// a price keep their previous mark.
    pub fn mark_to_market(&mut self, prices: &HashMap<String, Decimal>) {
        for position in self.positions.values_mut() {
            let Some(price) = prices.get(&position.symbol) else {
                continue;
            };
            position.current_price = *price;
            position.unrealized_pnl = directional_pnl(
                position.direction,
                position.entry_price,
                *price,
                position.quantity,
            ) - position.entry_commission;
            position.unrealized_pnl_pct = pct_of(
                position.unrealized_pnl,
                position.entry_price * position.quantity,
            );
        }
        self.refresh_equity();
    }

    pub fn snapshot(&self) -> PortfolioState {
        let wins = self
            .closed
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Win)
            .count();
        let losses = self
            .closed
            .iter()
            .filter(|t| t.outcome == TradeOutcome::Loss)
            .count();
        let win_rate = if self.closed.is_empty() {
            0.0
        } else {
            wins as f64 / self.closed.len() as f64
        };
        let mut open_positions: Vec<Position> = self.positions.values().cloned().collect();
        open_positions.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));

        let unrealized_pnl: Decimal = open_positions.iter().map(|p| p.unrealized_pnl).sum();
        let realized_pnl: Decimal = self.closed.iter().map(|t| t.net_pnl).sum();
        let total_pnl = realized_pnl + unrealized_pnl;

        PortfolioState {
            initial_capital: self.params.initial_capital,
            cash: self.cash,
            equity: self.equity,
            unrealized_pnl,
            realized_pnl,
            total_pnl,
            total_pnl_pct: pct_of(total_pnl, self.params.initial_capital),
            open_positions,
            closed_trades: self.closed.len(),
            wins,
            losses,
            win_rate,
            total_commission: self.closed.iter().map(|t| t.commission).sum::<Decimal>()
                + self.positions.values().map(|p| p.entry_commission).sum::<Decimal>(),
        }
    }

    fn refresh_equity(&mut self) {
        self.equity = self.cash
            + self
                .positions
                .values()
                .map(|p| p.quantity * p.current_price)
                .sum::<Decimal>();
    }
}

fn pct_of(amount: Decimal, base: Decimal) -> Decimal {
    if base == Decimal::ZERO {
        Decimal::ZERO
    } else {
        amount / base * Decimal::ONE_HUNDRED
    }
}

fn directional_pnl(
    direction: Direction,
    entry: Decimal,
    exit: Decimal,
    quantity: Decimal,
) -> Decimal {
    match direction {
        Direction::Long => (exit - entry) * quantity,
        Direction::Short => (entry - exit) * quantity,
        Direction::Neutral => Decimal::ZERO,
    }
}

//! Portfolio Ledger - per-contender cash, position and equity accounting.
//!
//! The ledger trusts its caller for policy (caps, risk) but refuses any
//! mutation that would break its own arithmetic: overselling, selling with no
//! position, or buying beyond available cash. A refused fill leaves the ledger
//! untouched.

pub mod metrics;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::core::{ContenderId, Fill, PortfolioSnapshot, Side, Symbol};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("sell of {requested} {symbol} exceeds held quantity {held}")]
    Oversell {
        symbol: Symbol,
        requested: Decimal,
        held: Decimal,
    },

    #[error("no open position in {0}")]
    NoPosition(Symbol),

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: Decimal, available: Decimal },

    #[error("invalid fill: {0}")]
    InvalidFill(String),

    #[error("fill for {fill} applied to ledger {ledger}")]
    WrongLedger { fill: ContenderId, ledger: ContenderId },
}

impl LedgerError {
    /// Machine-readable reason used in rejections and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Oversell { .. } => "oversell",
            LedgerError::NoPosition(_) => "no_position",
            LedgerError::InsufficientCash { .. } => "insufficient_cash",
            LedgerError::InvalidFill(_) => "invalid_fill",
            LedgerError::WrongLedger { .. } => "wrong_ledger",
        }
    }
}

/// Open long position. Zero-quantity positions are never stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub qty: Decimal,
    pub avg_price: Decimal,
}

impl Position {
    pub fn cost_basis(&self) -> Option<Decimal> {
        self.qty.checked_mul(self.avg_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// Isolated capital ledger owned by exactly one contender.
#[derive(Debug, Clone)]
pub struct Portfolio {
    contender_id: ContenderId,
    starting_cash: Decimal,
    cash: Decimal,
    positions: HashMap<Symbol, Position>,
    realized_pnl: Decimal,
    trade_count: u64,
    closed_count: u64,
    win_count: u64,
    equity_history: Vec<EquityPoint>,
}

impl Portfolio {
    pub fn new(contender_id: ContenderId, starting_cash: Decimal) -> Self {
        Self {
            contender_id,
            starting_cash,
            cash: starting_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            trade_count: 0,
            closed_count: 0,
            win_count: 0,
            equity_history: Vec::new(),
        }
    }

    pub fn contender_id(&self) -> &ContenderId {
        &self.contender_id
    }

    pub fn starting_cash(&self) -> Decimal {
        self.starting_cash
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn trade_count(&self) -> u64 {
        self.trade_count
    }

    /// SELL fills only; each one closes (part of) a round trip.
    pub fn closed_trade_count(&self) -> u64 {
        self.closed_count
    }

    pub fn win_count(&self) -> u64 {
        self.win_count
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&Symbol, &Position)> {
        self.positions.iter()
    }

    pub fn equity_history(&self) -> &[EquityPoint] {
        &self.equity_history
    }

    /// BUY: cash must cover `qty * price`. SELL never needs upfront cash.
    pub fn can_afford(&self, side: Side, qty: Decimal, price: Decimal) -> bool {
        match side {
            Side::Buy => qty.checked_mul(price).is_some_and(|cost| self.cash >= cost),
            Side::Sell => true,
        }
    }

    /// Apply a fill, setting its `realized_pnl`. Returns equity marked at the
    /// fill price for the traded symbol and average cost elsewhere.
    pub fn apply_fill(&mut self, fill: &mut Fill) -> Result<Decimal, LedgerError> {
        if fill.contender_id != self.contender_id {
            return Err(LedgerError::WrongLedger {
                fill: fill.contender_id.clone(),
                ledger: self.contender_id.clone(),
            });
        }
        if fill.qty <= Decimal::ZERO {
            return Err(LedgerError::InvalidFill(format!("non-positive qty {}", fill.qty)));
        }
        if fill.fill_price <= Decimal::ZERO {
            return Err(LedgerError::InvalidFill(format!(
                "non-positive price {}",
                fill.fill_price
            )));
        }

        let overflow = || LedgerError::InvalidFill(format!("{} x {} overflows", fill.qty, fill.fill_price));
        let notional = fill.notional().ok_or_else(overflow)?;

        // Every new value is computed before anything is written.
        let realized = match fill.side {
            Side::Buy => {
                if self.cash < notional {
                    return Err(LedgerError::InsufficientCash {
                        required: notional,
                        available: self.cash,
                    });
                }
                let next = match self.positions.get(&fill.symbol) {
                    Some(pos) => {
                        let qty = pos.qty.checked_add(fill.qty).ok_or_else(overflow)?;
                        let cost = pos
                            .cost_basis()
                            .and_then(|basis| basis.checked_add(notional))
                            .ok_or_else(overflow)?;
                        Position {
                            qty,
                            avg_price: cost.checked_div(qty).ok_or_else(overflow)?,
                        }
                    }
                    None => Position {
                        qty: fill.qty,
                        avg_price: fill.fill_price,
                    },
                };
                self.cash -= notional;
                self.positions.insert(fill.symbol.clone(), next);
                Decimal::ZERO
            }
            Side::Sell => {
                let pos = self
                    .positions
                    .get(&fill.symbol)
                    .ok_or_else(|| LedgerError::NoPosition(fill.symbol.clone()))?;
                if fill.qty > pos.qty {
                    return Err(LedgerError::Oversell {
                        symbol: fill.symbol.clone(),
                        requested: fill.qty,
                        held: pos.qty,
                    });
                }
                let realized = (fill.fill_price - pos.avg_price)
                    .checked_mul(fill.qty)
                    .ok_or_else(overflow)?;
                let cash = self.cash.checked_add(notional).ok_or_else(overflow)?;
                let total_realized = self.realized_pnl.checked_add(realized).ok_or_else(overflow)?;
                let remaining = pos.qty - fill.qty;

                if remaining.is_zero() {
                    self.positions.remove(&fill.symbol);
                } else if let Some(pos) = self.positions.get_mut(&fill.symbol) {
                    pos.qty = remaining;
                }
                self.cash = cash;
                self.realized_pnl = total_realized;
                self.closed_count += 1;
                if realized > Decimal::ZERO {
                    self.win_count += 1;
                }
                realized
            }
        };

        self.trade_count += 1;
        fill.realized_pnl = realized;

        let marks = HashMap::from([(fill.symbol.clone(), fill.fill_price)]);
        let equity = self.mark_to_market(&marks);
        self.equity_history.push(EquityPoint {
            timestamp: fill.fill_timestamp,
            equity,
        });
        Ok(equity)
    }

    /// `cash + Σ qty * price`, falling back to average cost when no live
    /// price is known for a symbol. Saturates instead of overflowing.
    pub fn mark_to_market(&self, prices: &HashMap<Symbol, Decimal>) -> Decimal {
        self.positions.iter().fold(self.cash, |equity, (symbol, pos)| {
            let mark = prices.get(symbol).copied().unwrap_or(pos.avg_price);
            equity.saturating_add(pos.qty.saturating_mul(mark))
        })
    }

    /// Append the current marked equity to the equity curve.
    pub fn record_equity(&mut self, timestamp: DateTime<Utc>, prices: &HashMap<Symbol, Decimal>) -> Decimal {
        let equity = self.mark_to_market(prices);
        self.equity_history.push(EquityPoint { timestamp, equity });
        equity
    }

    pub fn snapshot(&self, prices: &HashMap<Symbol, Decimal>, periods_per_year: f64) -> PortfolioSnapshot {
        let equity = self.mark_to_market(prices);
        let pnl = equity.saturating_sub(self.starting_cash);
        let pnl_pct = if self.starting_cash > Decimal::ZERO {
            pnl.checked_div(self.starting_cash)
                .map(|r| r.saturating_mul(Decimal::ONE_HUNDRED).round_dp(4))
                .unwrap_or(if pnl.is_sign_negative() { Decimal::MIN } else { Decimal::MAX })
        } else {
            Decimal::ZERO
        };
        let win_rate = if self.closed_count > 0 {
            (Decimal::from(self.win_count) / Decimal::from(self.closed_count)).round_dp(4)
        } else {
            Decimal::ZERO
        };

        PortfolioSnapshot {
            contender_id: self.contender_id.clone(),
            cash: self.cash,
            equity,
            pnl,
            pnl_pct,
            realized_pnl: self.realized_pnl,
            trades: self.trade_count,
            closed_trades: self.closed_count,
            wins: self.win_count,
            win_rate,
            open_positions: self.positions.len(),
            max_drawdown_pct: metrics::max_drawdown(&self.equity_history) * 100.0,
            sortino: metrics::sortino_ratio(&self.equity_history, periods_per_year),
            calmar: metrics::calmar_ratio(&self.equity_history),
            timestamp: Utc::now(),
        }
    }
}

//! Order Validator - last gate before simulation.
//!
//! Re-evaluated on every order against the live ledger; never cached.
//! `RejectReason` is also the shared rejection taxonomy for the risk gates
//! and for fills the ledger refused.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core::config::OrderLimits;
use crate::core::{OrderIntent, Side};
use crate::portfolio::{LedgerError, Portfolio};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RejectReason {
    #[error("invalid quantity {0}")]
    InvalidQuantity(Decimal),

    #[error("invalid price {0}")]
    InvalidPrice(Decimal),

    #[error("insufficient cash: required {required}, available {available}")]
    InsufficientCash { required: Decimal, available: Decimal },

    #[error("order value exceeds cap: {value} > {cap}")]
    OrderValueExceedsCap { value: Decimal, cap: Decimal },

    #[error("position size exceeds cap: {value} > {cap}")]
    PositionSizeExceedsCap { value: Decimal, cap: Decimal },

    #[error("kill switch active")]
    KillSwitchActive,

    #[error("manual approval mode active")]
    ManualApprovalActive,

    #[error("position size is zero")]
    ZeroPositionSize,

    #[error("ledger refused fill: {0}")]
    LedgerInvariant(#[from] LedgerError),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::InvalidQuantity(_) => "invalid_quantity",
            RejectReason::InvalidPrice(_) => "invalid_price",
            RejectReason::InsufficientCash { .. } => "insufficient_cash",
            RejectReason::OrderValueExceedsCap { .. } => "order_value_exceeds_cap",
            RejectReason::PositionSizeExceedsCap { .. } => "position_size_exceeds_cap",
            RejectReason::KillSwitchActive => "kill_switch_active",
            RejectReason::ManualApprovalActive => "manual_approval_active",
            RejectReason::ZeroPositionSize => "zero_position_size",
            RejectReason::LedgerInvariant(_) => "ledger_invariant",
        }
    }
}

/// Stateless per call: a pure function of order, ledger and static limits.
#[derive(Debug, Clone)]
pub struct OrderValidator {
    limits: OrderLimits,
}

impl OrderValidator {
    pub fn new(limits: OrderLimits) -> Self {
        Self { limits }
    }

    /// Checks run in order and stop at the first failure. SELL orders only
    /// face the sanity check; oversell is the ledger's concern.
    pub fn validate(&self, order: &OrderIntent, portfolio: &Portfolio) -> Result<(), RejectReason> {
        // 1. Sanity
        if order.qty <= Decimal::ZERO {
            return Err(RejectReason::InvalidQuantity(order.qty));
        }
        if order.decision_price <= Decimal::ZERO {
            return Err(RejectReason::InvalidPrice(order.decision_price));
        }

        if order.side == Side::Sell {
            return Ok(());
        }

        // 2. Buying power. A notional too large to represent is a bad quantity.
        let estimated_cost = order
            .qty
            .checked_mul(order.decision_price)
            .ok_or(RejectReason::InvalidQuantity(order.qty))?;
        if !portfolio.can_afford(order.side, order.qty, order.decision_price) {
            return Err(RejectReason::InsufficientCash {
                required: estimated_cost,
                available: portfolio.cash(),
            });
        }

        // 3. Order size
        if estimated_cost > self.limits.max_order_value {
            return Err(RejectReason::OrderValueExceedsCap {
                value: estimated_cost,
                cap: self.limits.max_order_value,
            });
        }

        // 4. Post-trade position size, existing lot valued at the decision price
        let existing_value = portfolio
            .position(&order.symbol)
            .map_or(Some(Decimal::ZERO), |p| p.qty.checked_mul(order.decision_price));
        let new_value = existing_value
            .and_then(|v| v.checked_add(estimated_cost))
            .ok_or(RejectReason::InvalidQuantity(order.qty))?;
        if new_value > self.limits.max_position_value {
            return Err(RejectReason::PositionSizeExceedsCap {
                value: new_value,
                cap: self.limits.max_position_value,
            });
        }

        Ok(())
    }
}

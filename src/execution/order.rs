//! Per-order lifecycle.
//!
//! `PENDING_RISK -> APPROVED -> VALIDATED -> FILLED`, or `REJECTED` from any
//! non-terminal state. Orders reach the router already `APPROVED`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::core::ContenderId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    PendingRisk,
    Approved,
    Validated,
    Filled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderState::Filled | OrderState::Rejected)
    }

    pub fn can_transition(self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (PendingRisk, Approved)
                | (Approved, Validated)
                | (Validated, Filled)
                | (PendingRisk | Approved | Validated, Rejected)
        )
    }

    /// Advance, or return the current state unchanged if the move is illegal.
    pub fn advance(self, next: OrderState) -> Result<OrderState, OrderState> {
        if self.can_transition(next) {
            Ok(next)
        } else {
            Err(self)
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderState::PendingRisk => "PENDING_RISK",
            OrderState::Approved => "APPROVED",
            OrderState::Validated => "VALIDATED",
            OrderState::Filled => "FILLED",
            OrderState::Rejected => "REJECTED",
        };
        write!(f, "{}", s)
    }
}

/// Order tracked in the pending book. Terminal entries stay until swept so
/// a replayed fill for the same order id can be refused.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub contender_id: ContenderId,
    pub state: OrderState,
    pub registered_at: Instant,
    pub completed_at: Option<Instant>,
}

impl PendingOrder {
    pub fn new(contender_id: ContenderId, state: OrderState) -> Self {
        Self {
            contender_id,
            state,
            registered_at: Instant::now(),
            completed_at: None,
        }
    }

    /// Force a terminal outcome. An external fill may close an order that
    /// never passed through `VALIDATED`.
    pub fn complete(&mut self, outcome: OrderState) {
        self.state = outcome;
        self.completed_at = Some(Instant::now());
    }

    pub fn is_consumed(&self) -> bool {
        self.state.is_terminal()
    }
}

/// `order_id -> owning contender`, shared by the router and its desks.
pub type PendingBook = Arc<Mutex<HashMap<Uuid, PendingOrder>>>;

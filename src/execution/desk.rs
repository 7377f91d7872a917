//! Per-contender trading desk.
//!
//! Each desk is a task that exclusively owns one `Portfolio` and drains a
//! private queue, so fills for a contender are applied one at a time and in
//! arrival order while other contenders run in parallel.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::order::{OrderState, PendingBook, PendingOrder};
use super::simulator::FillSimulator;
use super::validator::{OrderValidator, RejectReason};
use crate::audit::{AuditKind, AuditLog};
use crate::core::{
    ContenderId, Error, EventSink, Fill, FillEvent, FillStatus, OrderIntent, OrderRejection,
    OutboundEvent, PortfolioSnapshot, Result, Side, Symbol,
};
use crate::portfolio::Portfolio;

pub type PriceMap = HashMap<Symbol, Decimal>;

#[derive(Debug)]
pub enum DeskCommand {
    Execute(OrderIntent),
    ApplyFill(Fill),
    Snapshot {
        prices: PriceMap,
        record: bool,
        reply: oneshot::Sender<PortfolioSnapshot>,
    },
    Liquidate {
        prices: PriceMap,
        reason: String,
    },
}

/// Cheap, cloneable address of a running desk.
#[derive(Clone)]
pub struct LedgerHandle {
    contender_id: ContenderId,
    tx: flume::Sender<DeskCommand>,
}

impl LedgerHandle {
    pub fn contender_id(&self) -> &ContenderId {
        &self.contender_id
    }

    /// Two handles are the same ledger iff they share a queue.
    pub fn same_ledger(&self, other: &LedgerHandle) -> bool {
        self.tx.same_channel(&other.tx)
    }

    async fn send(&self, cmd: DeskCommand) -> Result<()> {
        self.tx
            .send_async(cmd)
            .await
            .map_err(|_| Error::Routing(super::router::RoutingError::LedgerClosed(self.contender_id.clone())))
    }

    pub async fn execute(&self, order: OrderIntent) -> Result<()> {
        self.send(DeskCommand::Execute(order)).await
    }

    pub async fn apply_fill(&self, fill: Fill) -> Result<()> {
        self.send(DeskCommand::ApplyFill(fill)).await
    }

    pub async fn liquidate(&self, prices: PriceMap, reason: String) -> Result<()> {
        self.send(DeskCommand::Liquidate { prices, reason }).await
    }

    /// Snapshot after everything queued before it has been applied.
    pub async fn snapshot(&self, prices: PriceMap, record: bool) -> Result<PortfolioSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(DeskCommand::Snapshot { prices, record, reply }).await?;
        rx.await
            .map_err(|_| Error::Routing(super::router::RoutingError::LedgerClosed(self.contender_id.clone())))
    }
}

/// Shared wiring every desk is built with.
#[derive(Clone)]
pub struct DeskContext {
    pub validator: OrderValidator,
    pub apply_latency: bool,
    pub periods_per_year: f64,
    pub pending: PendingBook,
    pub sink: Arc<dyn EventSink>,
    pub audit: Option<Arc<AuditLog>>,
}

pub struct Desk {
    portfolio: Portfolio,
    simulator: FillSimulator,
    ctx: DeskContext,
}

impl Desk {
    pub fn new(portfolio: Portfolio, simulator: FillSimulator, ctx: DeskContext) -> Self {
        Self {
            portfolio,
            simulator,
            ctx,
        }
    }

    /// Start the desk task and return its handle.
    pub fn spawn(self) -> LedgerHandle {
        let (tx, rx) = flume::unbounded();
        let contender_id = self.portfolio.contender_id().clone();
        tokio::spawn(self.run(rx));
        LedgerHandle { contender_id, tx }
    }

    async fn run(mut self, rx: flume::Receiver<DeskCommand>) {
        tracing::debug!(contender = %self.portfolio.contender_id(), "Desk opened");
        while let Ok(cmd) = rx.recv_async().await {
            match cmd {
                DeskCommand::Execute(order) => self.execute(order).await,
                DeskCommand::ApplyFill(fill) => self.apply(fill).await,
                DeskCommand::Snapshot { prices, record, reply } => {
                    if record {
                        self.portfolio.record_equity(Utc::now(), &prices);
                    }
                    let _ = reply.send(self.portfolio.snapshot(&prices, self.ctx.periods_per_year));
                }
                DeskCommand::Liquidate { prices, reason } => self.liquidate(&prices, &reason).await,
            }
        }
        tracing::debug!(contender = %self.portfolio.contender_id(), "Desk closed");
    }

    /// Terminal outcomes are recorded even for orders the router never
    /// registered, so an orphan fill is consumed once as well.
    fn set_state(&self, order_id: Uuid, next: OrderState) {
        let mut pending = self.ctx.pending.lock();
        if next.is_terminal() {
            pending
                .entry(order_id)
                .or_insert_with(|| PendingOrder::new(self.portfolio.contender_id().clone(), next))
                .complete(next);
            return;
        }
        if let Some(entry) = pending.get_mut(&order_id) {
            match entry.state.advance(next) {
                Ok(state) => entry.state = state,
                Err(state) => tracing::warn!(%order_id, from = %state, to = %next, "Illegal order transition"),
            }
        }
    }

    fn is_consumed(&self, order_id: &Uuid) -> bool {
        self.ctx
            .pending
            .lock()
            .get(order_id)
            .is_some_and(|p| p.is_consumed())
    }

    async fn publish(&self, event: OutboundEvent) {
        if let Err(e) = self.ctx.sink.publish(event).await {
            tracing::warn!(contender = %self.portfolio.contender_id(), "Event dropped: {}", e);
        }
    }

    fn audit<T: serde::Serialize>(&self, kind: AuditKind, data: &T) {
        if let Some(log) = &self.ctx.audit {
            log.record(kind, data);
        }
    }

    async fn reject(&self, order_id: Option<Uuid>, symbol: &Symbol, side: Side, qty: Decimal, reason: RejectReason) {
        let rejection = OrderRejection {
            order_id,
            contender_id: self.portfolio.contender_id().clone(),
            symbol: symbol.clone(),
            side,
            qty,
            reason: reason.code().to_string(),
            detail: reason.to_string(),
            status: FillStatus::Rejected,
            timestamp: Utc::now(),
        };
        self.audit(AuditKind::Rejection, &rejection);
        self.publish(OutboundEvent::OrderRejected(rejection)).await;
    }

    /// Validate, simulate, apply. Every exit leaves the order terminal.
    async fn execute(&mut self, order: OrderIntent) {
        if self.is_consumed(&order.order_id) {
            tracing::warn!(contender = %order.contender_id, order_id = %order.order_id, "Duplicate order ignored");
            return;
        }
        if let Err(reason) = self.ctx.validator.validate(&order, &self.portfolio) {
            tracing::info!(
                contender = %order.contender_id,
                order_id = %order.order_id,
                reason = reason.code(),
                "Order rejected: {}",
                reason
            );
            self.set_state(order.order_id, OrderState::Rejected);
            self.reject(Some(order.order_id), &order.symbol, order.side, order.qty, reason)
                .await;
            return;
        }
        self.set_state(order.order_id, OrderState::Validated);

        let sim = self.simulator.simulate(order.decision_price, order.side, order.qty);
        if self.ctx.apply_latency && !sim.delay.is_zero() {
            tokio::time::sleep(sim.delay).await;
        }

        let fill = Fill {
            order_id: Some(order.order_id),
            contender_id: order.contender_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            fill_price: sim.fill_price,
            fill_timestamp: Utc::now(),
            realized_pnl: Decimal::ZERO,
        };
        tracing::debug!(
            order_id = %order.order_id,
            decision = %order.decision_price,
            fill = %sim.fill_price,
            slippage_bps = sim.slippage_bps,
            delay_ms = sim.delay.as_millis() as u64,
            "Simulated fill"
        );
        self.apply(fill).await;
    }

    async fn apply(&mut self, mut fill: Fill) {
        if let Some(id) = fill.order_id.filter(|id| self.is_consumed(id)) {
            tracing::warn!(contender = %fill.contender_id, order_id = %id, "Duplicate fill dropped");
            return;
        }
        match self.portfolio.apply_fill(&mut fill) {
            Ok(equity) => {
                if let Some(id) = fill.order_id {
                    self.set_state(id, OrderState::Filled);
                }
                tracing::info!(
                    contender = %fill.contender_id,
                    symbol = %fill.symbol,
                    side = %fill.side,
                    qty = %fill.qty,
                    price = %fill.fill_price,
                    realized = %fill.realized_pnl,
                    %equity,
                    "💰 Fill applied"
                );
                self.audit(AuditKind::Fill, &fill);
                self.publish(OutboundEvent::FillEvent(FillEvent::from(fill))).await;
            }
            Err(e) => {
                tracing::error!(
                    contender = %fill.contender_id,
                    order_id = ?fill.order_id,
                    symbol = %fill.symbol,
                    code = e.code(),
                    "❌ Ledger refused fill: {}",
                    e
                );
                if let Some(id) = fill.order_id {
                    self.set_state(id, OrderState::Rejected);
                }
                self.reject(fill.order_id, &fill.symbol, fill.side, fill.qty, RejectReason::from(e))
                    .await;
            }
        }
    }

    /// Sell every open position at its last known price, or average cost
    /// when none is known.
    async fn liquidate(&mut self, prices: &PriceMap, reason: &str) {
        let positions: Vec<(Symbol, Decimal, Decimal)> = self
            .portfolio
            .positions()
            .map(|(s, p)| (s.clone(), p.qty, prices.get(s).copied().unwrap_or(p.avg_price)))
            .collect();
        tracing::warn!(
            contender = %self.portfolio.contender_id(),
            positions = positions.len(),
            reason,
            "🚨 Liquidating all positions"
        );

        for (symbol, qty, mark) in positions {
            let sim = self.simulator.simulate(mark, Side::Sell, qty);
            let fill = Fill {
                order_id: None,
                contender_id: self.portfolio.contender_id().clone(),
                symbol,
                side: Side::Sell,
                qty,
                fill_price: sim.fill_price,
                fill_timestamp: Utc::now(),
                realized_pnl: Decimal::ZERO,
            };
            self.apply(fill).await;
        }
    }
}

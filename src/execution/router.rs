//! Execution Router - owns the order-to-ledger mapping and the desks.
//!
//! Approved orders go to the owning contender's desk (validate, simulate,
//! apply). External execution results are resolved by precedence:
//! known `order_id` first, then the payload's `contender_id`, else dropped.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::desk::{Desk, DeskContext, LedgerHandle, PriceMap};
use super::order::{OrderState, PendingBook, PendingOrder};
use super::simulator::FillSimulator;
use super::validator::OrderValidator;
use crate::audit::AuditLog;
use crate::core::config::{ArenaConfig, SimulationConfig};
use crate::core::{
    ContenderId, ControlCommand, ControlKind, EventSink, ExecutionResult, Fill, MarketPrice,
    OrderIntent, OutboundEvent, PortfolioSnapshot, Result, Side, Symbol,
};
use crate::portfolio::Portfolio;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingError {
    #[error("unroutable fill: {side} {qty} {symbol} has no known order id and no contender id")]
    Unroutable { symbol: Symbol, side: Side, qty: Decimal },

    #[error("order {order_id} already {state}, fill dropped")]
    AlreadyConsumed { order_id: Uuid, state: OrderState },

    #[error("ledger for {0} is closed")]
    LedgerClosed(ContenderId),
}

/// How an execution result found its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Matched a registered order.
    Order(ContenderId),
    /// Order linkage lost; fell back to the payload's contender id.
    Orphan(ContenderId),
}

impl Route {
    pub fn contender_id(&self) -> &ContenderId {
        match self {
            Route::Order(id) | Route::Orphan(id) => id,
        }
    }
}

/// Everything the router reacts to.
#[derive(Debug, Clone)]
pub enum RouterInput {
    Order(OrderIntent),
    Execution(ExecutionResult),
    Price(MarketPrice),
    Control(ControlCommand),
}

pub struct ExecutionRouter {
    starting_cash: Decimal,
    simulation: SimulationConfig,
    template: DeskContext,
    ledgers: RwLock<HashMap<ContenderId, LedgerHandle>>,
    pending: PendingBook,
    prices: RwLock<PriceMap>,
    sink: Arc<dyn EventSink>,
    snapshot_interval: Duration,
    sweep_interval: Duration,
    pending_ttl: Duration,
}

impl ExecutionRouter {
    pub fn new(config: &ArenaConfig, sink: Arc<dyn EventSink>, audit: Option<Arc<AuditLog>>) -> Self {
        let pending: PendingBook = Arc::new(Mutex::new(HashMap::new()));
        let template = DeskContext {
            validator: OrderValidator::new(config.limits.clone()),
            apply_latency: config.simulation.apply_latency,
            periods_per_year: config.risk.periods_per_year,
            pending: pending.clone(),
            sink: sink.clone(),
            audit,
        };
        Self {
            starting_cash: config.arena.starting_cash,
            simulation: config.simulation.clone(),
            template,
            ledgers: RwLock::new(HashMap::new()),
            pending,
            prices: RwLock::new(PriceMap::new()),
            sink,
            snapshot_interval: Duration::from_millis(config.arena.snapshot_interval_ms.max(1)),
            sweep_interval: Duration::from_secs(config.router.sweep_interval_secs),
            pending_ttl: config.router.pending_ttl(),
        }
    }

    /// Idempotent: a second call for the same id returns the live ledger.
    pub fn get_or_create(&self, id: &ContenderId) -> LedgerHandle {
        if let Some(handle) = self.ledgers.read().get(id) {
            return handle.clone();
        }
        let mut ledgers = self.ledgers.write();
        ledgers
            .entry(id.clone())
            .or_insert_with(|| {
                tracing::info!(contender = %id, cash = %self.starting_cash, "📒 Opened ledger");
                let desk = Desk::new(
                    Portfolio::new(id.clone(), self.starting_cash),
                    FillSimulator::for_contender(self.simulation.clone(), id),
                    self.template.clone(),
                );
                desk.spawn()
            })
            .clone()
    }

    pub fn ledger(&self, id: &ContenderId) -> Option<LedgerHandle> {
        self.ledgers.read().get(id).cloned()
    }

    pub fn contenders(&self) -> Vec<ContenderId> {
        self.ledgers.read().keys().cloned().collect()
    }

    /// Re-registering a known order id keeps the existing entry.
    pub fn register_order(&self, order: &OrderIntent) {
        self.pending
            .lock()
            .entry(order.order_id)
            .or_insert_with(|| PendingOrder::new(order.contender_id.clone(), OrderState::Approved));
    }

    /// Orders still waiting on a fill or a rejection.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().filter(|p| !p.is_consumed()).count()
    }

    pub fn order_state(&self, order_id: &Uuid) -> Option<OrderState> {
        self.pending.lock().get(order_id).map(|p| p.state)
    }

    /// Register then hand the order to its desk. Returns once queued.
    pub async fn submit(&self, order: OrderIntent) -> Result<()> {
        self.register_order(&order);
        let handle = self.get_or_create(&order.contender_id);
        tracing::debug!(contender = %order.contender_id, order_id = %order.order_id, "Order routed");
        handle.execute(order).await
    }

    pub fn resolve(&self, result: &ExecutionResult) -> std::result::Result<Route, RoutingError> {
        if let Some(order_id) = result.order_id {
            if let Some(pending) = self.pending.lock().get(&order_id) {
                if pending.is_consumed() {
                    return Err(RoutingError::AlreadyConsumed {
                        order_id,
                        state: pending.state,
                    });
                }
                return Ok(Route::Order(pending.contender_id.clone()));
            }
        }
        match &result.contender_id {
            Some(id) => Ok(Route::Orphan(id.clone())),
            None => Err(RoutingError::Unroutable {
                symbol: result.symbol.clone(),
                side: result.side,
                qty: result.qty,
            }),
        }
    }

    pub async fn on_execution_result(&self, result: ExecutionResult) -> Result<()> {
        let route = match self.resolve(&result) {
            Ok(route) => route,
            Err(e @ RoutingError::AlreadyConsumed { .. }) => {
                tracing::warn!(contender = ?result.contender_id, "⚠️ {}", e);
                return Err(e.into());
            }
            Err(e) => {
                tracing::error!(order_id = ?result.order_id, "❌ {}", e);
                return Err(e.into());
            }
        };

        match &route {
            Route::Order(id) => {
                if let Some(claimed) = result.contender_id.as_ref().filter(|c| *c != id) {
                    tracing::warn!(order_id = ?result.order_id, owner = %id, %claimed, "Fill contender mismatch, routing by order id");
                }
            }
            Route::Orphan(id) => {
                tracing::warn!(order_id = ?result.order_id, contender = %id, symbol = %result.symbol, "⚠️ Orphan fill routed by contender id");
            }
        }

        let contender_id = route.contender_id().clone();
        let fill = Fill {
            order_id: result.order_id,
            contender_id: contender_id.clone(),
            symbol: result.symbol,
            side: result.side,
            qty: result.qty,
            fill_price: result.fill_price,
            fill_timestamp: result.fill_timestamp,
            realized_pnl: Decimal::ZERO,
        };
        self.get_or_create(&contender_id).apply_fill(fill).await
    }

    pub fn update_price(&self, price: MarketPrice) {
        if price.price <= Decimal::ZERO {
            tracing::debug!(symbol = %price.symbol, price = %price.price, "Ignoring non-positive price");
            return;
        }
        self.prices.write().insert(price.symbol, price.price);
    }

    pub fn prices(&self) -> PriceMap {
        self.prices.read().clone()
    }

    pub async fn on_control(&self, cmd: ControlCommand) -> Result<()> {
        match cmd.command {
            ControlKind::LiquidateAll => match self.ledger(&cmd.contender_id) {
                Some(handle) => handle.liquidate(self.prices(), cmd.reason).await,
                None => {
                    tracing::warn!(contender = %cmd.contender_id, "LIQUIDATE_ALL for unknown contender");
                    Ok(())
                }
            },
            ControlKind::ActivateManualApproval => {
                tracing::warn!(contender = %cmd.contender_id, reason = %cmd.reason, "Manual approval mode active");
                Ok(())
            }
        }
    }

    pub async fn snapshot(&self, id: &ContenderId) -> Result<Option<PortfolioSnapshot>> {
        match self.ledger(id) {
            Some(handle) => Ok(Some(handle.snapshot(self.prices(), false).await?)),
            None => Ok(None),
        }
    }

    /// One snapshot per ledger, taken concurrently. `record` appends each
    /// marked equity to that ledger's curve.
    pub async fn snapshot_all(&self, record: bool) -> Vec<PortfolioSnapshot> {
        let handles: Vec<LedgerHandle> = self.ledgers.read().values().cloned().collect();
        let prices = self.prices();
        let results = join_all(handles.iter().map(|h| h.snapshot(prices.clone(), record))).await;
        results
            .into_iter()
            .filter_map(|r| match r {
                Ok(snap) => Some(snap),
                Err(e) => {
                    tracing::warn!("Snapshot failed: {}", e);
                    None
                }
            })
            .collect()
    }

    /// Snapshots ranked by pnl, best first.
    pub async fn leaderboard(&self) -> Vec<PortfolioSnapshot> {
        let mut board = self.snapshot_all(false).await;
        board.sort_by(|a, b| b.pnl.cmp(&a.pnl));
        board
    }

    pub async fn publish_snapshots(&self) {
        for snap in self.snapshot_all(true).await {
            if let Err(e) = self.sink.publish(OutboundEvent::PortfolioSnapshot(snap)).await {
                tracing::warn!("Snapshot dropped: {}", e);
            }
        }
    }

    /// Drop open orders registered more than `ttl` ago, and forget completed
    /// ones `ttl` after they finished. Returns how many open orders were
    /// abandoned.
    pub fn sweep_abandoned(&self, ttl: Duration) -> usize {
        let mut abandoned = 0;
        self.pending.lock().retain(|order_id, p| {
            if let Some(done) = p.completed_at {
                return done.elapsed() < ttl;
            }
            let keep = p.registered_at.elapsed() < ttl;
            if !keep {
                tracing::warn!(%order_id, contender = %p.contender_id, state = %p.state, "Abandoned order dropped");
                abandoned += 1;
            }
            keep
        });
        abandoned
    }

    /// Per-input errors are logged; they never stop the router.
    pub async fn handle(&self, input: RouterInput) {
        let result = match input {
            RouterInput::Order(order) => self.submit(order).await,
            RouterInput::Execution(result) => self.on_execution_result(result).await,
            RouterInput::Price(price) => {
                self.update_price(price);
                Ok(())
            }
            RouterInput::Control(cmd) => self.on_control(cmd).await,
        };
        if let Err(e) = result {
            tracing::warn!("Router input failed: {}", e);
        }
    }

    pub async fn run(self: Arc<Self>, rx: flume::Receiver<RouterInput>) {
        let mut snapshot_tick = tokio::time::interval(self.snapshot_interval);
        let mut sweep_tick = tokio::time::interval(self.sweep_interval);
        tracing::info!(
            snapshot_ms = self.snapshot_interval.as_millis() as u64,
            ttl_secs = self.pending_ttl.as_secs(),
            "🚀 Execution router started"
        );

        loop {
            tokio::select! {
                input = rx.recv_async() => match input {
                    Ok(input) => self.handle(input).await,
                    Err(_) => break,
                },
                _ = snapshot_tick.tick() => self.publish_snapshots().await,
                _ = sweep_tick.tick() => {
                    let dropped = self.sweep_abandoned(self.pending_ttl);
                    if dropped > 0 {
                        tracing::info!(dropped, "Swept abandoned orders");
                    }
                }
            }
        }
        tracing::info!("Execution router stopped");
    }
}

//! Risk guardian service.
//!
//! Turns approved signals into sized orders, watches fills and snapshots for
//! kill-switch conditions, and publishes control commands. One `RiskState`
//! per contender, owned here and nowhere else.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;

use super::{RiskEngine, RiskState};
use crate::audit::{AuditKind, AuditLog};
use crate::core::{
    ApprovedSignal, ContenderId, ControlCommand, ControlKind, Direction, EventSink, FillEvent,
    FillStatus, OperatorAction, OperatorCommand, OrderIntent, OutboundEvent, PortfolioSnapshot,
    Side,
};
use crate::execution::validator::RejectReason;

/// Everything the guardian reacts to.
#[derive(Debug, Clone)]
pub enum GuardianInput {
    Signal(ApprovedSignal),
    Fill(FillEvent),
    Snapshot(PortfolioSnapshot),
    Operator(OperatorCommand),
}

#[derive(Debug)]
struct ContenderRisk {
    state: RiskState,
    session_date: NaiveDate,
    session_open_equity: Decimal,
    approved_since_check: u64,
}

pub struct RiskGuardian {
    engine: RiskEngine,
    starting_equity: Decimal,
    contenders: HashMap<ContenderId, ContenderRisk>,
    audit: Option<Arc<AuditLog>>,
}

impl RiskGuardian {
    /// `starting_equity` seeds contenders seen before their first snapshot.
    pub fn new(engine: RiskEngine, starting_equity: Decimal, audit: Option<Arc<AuditLog>>) -> Self {
        Self {
            engine,
            starting_equity,
            contenders: HashMap::new(),
            audit,
        }
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    pub fn state(&self, id: &ContenderId) -> Option<&RiskState> {
        self.contenders.get(id).map(|c| &c.state)
    }

    fn contender(&mut self, id: &ContenderId) -> &mut ContenderRisk {
        let engine = &self.engine;
        let equity = self.starting_equity;
        self.contenders.entry(id.clone()).or_insert_with(|| {
            let mut state = engine.new_state(id.clone());
            engine.begin_session(&mut state, equity);
            ContenderRisk {
                state,
                session_date: Utc::now().date_naive(),
                session_open_equity: equity,
                approved_since_check: 0,
            }
        })
    }

    fn audit<T: serde::Serialize>(&self, kind: AuditKind, data: &T) {
        if let Some(log) = &self.audit {
            log.record(kind, data);
        }
    }

    fn reject(&self, signal: &ApprovedSignal, reason: RejectReason) {
        tracing::info!(
            contender = %signal.contender_id,
            symbol = %signal.symbol,
            reason = reason.code(),
            "Signal rejected: {}",
            reason
        );
        self.audit(
            AuditKind::Rejection,
            &serde_json::json!({
                "stage": "risk",
                "contender_id": signal.contender_id,
                "symbol": signal.symbol,
                "side": signal.side,
                "reason": reason.code(),
                "detail": reason.to_string(),
            }),
        );
    }

    fn kill_switch_tripped(&self, id: &ContenderId, state: &RiskState) -> OutboundEvent {
        let reason = format!(
            "daily_pnl {} / consecutive_losses {}",
            state.daily_pnl(),
            state.consecutive_losses()
        );
        let cmd = ControlCommand::new(ControlKind::LiquidateAll, id.clone(), reason);
        self.audit(AuditKind::KillSwitch, &cmd);
        OutboundEvent::ControlCommand(cmd)
    }

    /// Gate, size and approve one signal. Risk rejections stay inside the
    /// guardian; only approvals and control commands are returned.
    pub fn on_signal(&mut self, signal: ApprovedSignal) -> Vec<OutboundEvent> {
        self.audit(AuditKind::Signal, &signal);
        let mut out = Vec::new();
        let id = signal.contender_id.clone();

        let engine = self.engine.clone();
        let contender = self.contender(&id);

        if let Err(reason) = engine.validate_signal(&contender.state, &signal) {
            self.reject(&signal, reason);
            return out;
        }

        if engine.check_kill_switch(&mut contender.state) {
            let state = contender.state.clone();
            out.push(self.kill_switch_tripped(&id, &state));
            self.reject(&signal, RejectReason::KillSwitchActive);
            return out;
        }

        if signal.decision_price <= Decimal::ZERO {
            self.reject(&signal, RejectReason::InvalidPrice(signal.decision_price));
            return out;
        }

        let stop_distance = signal
            .decision_price
            .checked_mul(engine.config().stop_loss_pct)
            .unwrap_or(Decimal::ZERO);
        let stop = match signal.side {
            Side::Buy => signal.decision_price.saturating_sub(stop_distance),
            Side::Sell => signal.decision_price.saturating_add(stop_distance),
        };
        let qty = match (signal.side, signal.qty) {
            (Side::Sell, Some(qty)) => qty,
            _ => engine.calculate_position_size(&contender.state, signal.decision_price, stop),
        };
        if qty <= Decimal::ZERO {
            self.reject(&signal, RejectReason::ZeroPositionSize);
            return out;
        }

        let order = OrderIntent::new(
            id.clone(),
            signal.symbol.clone(),
            signal.side,
            qty,
            signal.decision_price,
            signal.signal_timestamp,
        );
        tracing::info!(
            contender = %id,
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            price = %order.decision_price,
            "✅ Order approved"
        );
        self.audit(AuditKind::Order, &order);
        out.push(OutboundEvent::ApprovedOrder(order));

        let interval = engine.config().performance_check_interval;
        let contender = self.contender(&id);
        contender.approved_since_check += 1;
        if contender.approved_since_check >= interval {
            contender.approved_since_check = 0;
            if engine.check_model_performance(&mut contender.state) {
                let reason = format!(
                    "sharpe {:?} / accuracy {:?}",
                    engine.rolling_sharpe(&contender.state),
                    engine.rolling_accuracy(&contender.state)
                );
                let cmd = ControlCommand::new(ControlKind::ActivateManualApproval, id, reason);
                self.audit(AuditKind::ManualApprovalMode, &cmd);
                out.push(OutboundEvent::ControlCommand(cmd));
            }
        }

        out
    }

    /// A filled SELL closes (part of) a trade: feed the loss streak and the
    /// prediction window, then re-check the kill switch.
    pub fn on_fill(&mut self, fill: &FillEvent) -> Vec<OutboundEvent> {
        if fill.status != FillStatus::Filled || fill.side != Side::Sell {
            return Vec::new();
        }

        let engine = self.engine.clone();
        let contender = self.contender(&fill.contender_id);
        let state = &mut contender.state;

        engine.record_trade_result(state, fill.realized_pnl);

        let ret = fill
            .fill_price
            .checked_mul(fill.qty)
            .and_then(|proceeds| proceeds.checked_sub(fill.realized_pnl))
            .filter(|basis| *basis > Decimal::ZERO)
            .and_then(|basis| fill.realized_pnl.checked_div(basis))
            .and_then(|r| r.to_f64())
            .unwrap_or(0.0);
        let outcome = if fill.realized_pnl > Decimal::ZERO {
            Direction::Up
        } else {
            Direction::Down
        };
        engine.record_prediction(state, Direction::Up, outcome, ret);

        let was_killed = state.is_killed();
        if engine.check_kill_switch(state) && !was_killed {
            let state = state.clone();
            return vec![self.kill_switch_tripped(&fill.contender_id, &state)];
        }
        Vec::new()
    }

    /// Feed marked equity into the daily-loss check. A new UTC date opens a
    /// new session at the snapshot's equity.
    pub fn on_snapshot(&mut self, snapshot: &PortfolioSnapshot) -> Vec<OutboundEvent> {
        let engine = self.engine.clone();
        let contender = self.contender(&snapshot.contender_id);
        let today = snapshot.timestamp.date_naive();

        if contender.session_date != today {
            tracing::info!(contender = %snapshot.contender_id, %today, "New trading session");
            contender.session_date = today;
            contender.session_open_equity = snapshot.equity;
            // A tripped switch survives the date change until an operator reset.
            if !contender.state.is_killed() {
                engine.begin_session(&mut contender.state, snapshot.equity);
            }
        }

        let daily_pnl = snapshot.equity - contender.session_open_equity;
        engine.update_account_state(&mut contender.state, snapshot.equity, daily_pnl);

        let was_killed = contender.state.is_killed();
        if engine.check_kill_switch(&mut contender.state) && !was_killed {
            let state = contender.state.clone();
            return vec![self.kill_switch_tripped(&snapshot.contender_id, &state)];
        }
        Vec::new()
    }

    pub fn on_operator(&mut self, cmd: &OperatorCommand) {
        let engine = self.engine.clone();
        let contender = self.contender(&cmd.contender_id);
        match cmd.command {
            OperatorAction::ResetKillSwitch => {
                engine.reset_kill_switch(&mut contender.state);
                contender.session_open_equity = contender.state.current_equity();
                contender.session_date = Utc::now().date_naive();
            }
            OperatorAction::ResetManualApproval => {
                engine.reset_manual_approval(&mut contender.state);
                contender.approved_since_check = 0;
            }
        }
    }

    pub fn handle(&mut self, input: GuardianInput) -> Vec<OutboundEvent> {
        match input {
            GuardianInput::Signal(signal) => self.on_signal(signal),
            GuardianInput::Fill(fill) => self.on_fill(&fill),
            GuardianInput::Snapshot(snapshot) => self.on_snapshot(&snapshot),
            GuardianInput::Operator(cmd) => {
                self.on_operator(&cmd);
                Vec::new()
            }
        }
    }

    /// Drain inputs until every sender is gone or the sink closes.
    pub async fn run<S: EventSink>(mut self, rx: flume::Receiver<GuardianInput>, sink: S) {
        tracing::info!("🛡️ Risk guardian started");
        while let Ok(input) = rx.recv_async().await {
            for event in self.handle(input) {
                if let Err(e) = sink.publish(event).await {
                    tracing::error!("Risk guardian sink closed: {}", e);
                    return;
                }
            }
        }
        tracing::info!("Risk guardian stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::RiskConfig;
    use crate::core::Symbol;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn guardian() -> RiskGuardian {
        RiskGuardian::new(RiskEngine::new(RiskConfig::default()), dec!(100000), None)
    }

    fn signal(id: &str, side: Side, price: Decimal) -> ApprovedSignal {
        ApprovedSignal {
            contender_id: ContenderId::new(id),
            symbol: Symbol::new("SPY"),
            side,
            confidence: 0.7,
            decision_price: price,
            signal_timestamp: Utc::now(),
            qty: None,
        }
    }

    fn snapshot(id: &str, equity: Decimal) -> PortfolioSnapshot {
        PortfolioSnapshot {
            contender_id: ContenderId::new(id),
            cash: equity,
            equity,
            pnl: Decimal::ZERO,
            pnl_pct: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            trades: 0,
            closed_trades: 0,
            wins: 0,
            win_rate: Decimal::ZERO,
            open_positions: 0,
            max_drawdown_pct: 0.0,
            sortino: None,
            calmar: None,
            timestamp: Utc::now(),
        }
    }

    fn sell_fill(id: &str, realized: Decimal) -> FillEvent {
        FillEvent {
            order_id: None,
            contender_id: ContenderId::new(id),
            symbol: Symbol::new("SPY"),
            side: Side::Sell,
            qty: dec!(10),
            fill_price: dec!(100),
            fill_timestamp: Utc::now(),
            realized_pnl: realized,
            status: FillStatus::Filled,
        }
    }

    fn approved(events: &[OutboundEvent]) -> Vec<&OrderIntent> {
        events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::ApprovedOrder(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    fn controls(events: &[OutboundEvent]) -> Vec<ControlKind> {
        events
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::ControlCommand(c) => Some(c.command),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_signal_sized_from_equity_and_stop() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        let out = g.on_signal(signal("a", Side::Buy, dec!(100)));
        let orders = approved(&out);
        assert_eq!(orders.len(), 1);
        // 1% of 100k over a 2-dollar stop
        assert_eq!(orders[0].qty, dec!(500));
        assert_eq!(orders[0].decision_price, dec!(100));
    }

    #[test]
    fn test_signal_before_snapshot_uses_seed_equity() {
        let mut g = guardian();
        let out = g.on_signal(signal("a", Side::Buy, dec!(100)));
        assert_eq!(approved(&out)[0].qty, dec!(500));
    }

    #[test]
    fn test_signal_without_equity_is_zero_size() {
        let mut g = RiskGuardian::new(RiskEngine::new(RiskConfig::default()), Decimal::ZERO, None);
        let out = g.on_signal(signal("a", Side::Buy, dec!(100)));
        assert!(out.is_empty());
    }

    #[test]
    fn test_sell_signal_uses_explicit_qty() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        let mut s = signal("a", Side::Sell, dec!(100));
        s.qty = Some(dec!(7));
        let out = g.on_signal(s);
        assert_eq!(approved(&out)[0].qty, dec!(7));
    }

    #[test]
    fn test_non_positive_price_rejected() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        assert!(g.on_signal(signal("a", Side::Buy, dec!(0))).is_empty());
    }

    #[test]
    fn test_extreme_values_rejected_quietly() {
        let mut g = guardian();
        assert!(g.on_signal(signal("a", Side::Buy, Decimal::MAX)).is_empty());

        let mut f = sell_fill("a", dec!(-1));
        f.qty = Decimal::MAX;
        f.fill_price = Decimal::MAX;
        assert!(g.on_fill(&f).is_empty());
        let state = g.state(&ContenderId::new("a")).unwrap();
        assert_eq!(state.predictions().len(), 1);
        assert_eq!(state.consecutive_losses(), 1);
    }

    #[test]
    fn test_snapshot_loss_trips_once() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        let out = g.on_snapshot(&snapshot("a", dec!(96000)));
        assert_eq!(controls(&out), vec![ControlKind::LiquidateAll]);
        assert!(g.state(&ContenderId::new("a")).unwrap().is_killed());

        assert!(g.on_snapshot(&snapshot("a", dec!(95000))).is_empty());
        assert!(g.on_signal(signal("a", Side::Buy, dec!(100))).is_empty());
    }

    #[test]
    fn test_losing_fills_trip_kill_switch() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        for _ in 0..4 {
            assert!(g.on_fill(&sell_fill("a", dec!(-5))).is_empty());
        }
        let out = g.on_fill(&sell_fill("a", dec!(-5)));
        assert_eq!(controls(&out), vec![ControlKind::LiquidateAll]);
        assert!(g.on_fill(&sell_fill("a", dec!(-5))).is_empty());
    }

    #[test]
    fn test_buy_fills_do_not_count_as_trades() {
        let mut g = guardian();
        let mut f = sell_fill("a", Decimal::ZERO);
        f.side = Side::Buy;
        g.on_fill(&f);
        assert!(g.state(&ContenderId::new("a")).unwrap().predictions().is_empty());
    }

    #[test]
    fn test_poor_model_enters_manual_approval() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        // 1 win, 4 losses recorded; streak stays below the kill limit
        g.on_fill(&sell_fill("a", dec!(-1)));
        g.on_fill(&sell_fill("a", dec!(-1)));
        g.on_fill(&sell_fill("a", dec!(3)));
        g.on_fill(&sell_fill("a", dec!(-1)));
        g.on_fill(&sell_fill("a", dec!(-1)));

        let mut kinds = Vec::new();
        for _ in 0..10 {
            kinds.extend(controls(&g.on_signal(signal("a", Side::Buy, dec!(10)))));
        }
        assert_eq!(kinds, vec![ControlKind::ActivateManualApproval]);
        assert!(g.on_signal(signal("a", Side::Buy, dec!(10))).is_empty());

        g.on_operator(&OperatorCommand {
            command: OperatorAction::ResetManualApproval,
            contender_id: ContenderId::new("a"),
        });
        assert_eq!(approved(&g.on_signal(signal("a", Side::Buy, dec!(10)))).len(), 1);
    }

    #[test]
    fn test_reset_kill_switch_reopens_session() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        g.on_snapshot(&snapshot("a", dec!(90000)));
        g.on_operator(&OperatorCommand {
            command: OperatorAction::ResetKillSwitch,
            contender_id: ContenderId::new("a"),
        });
        assert!(g.on_snapshot(&snapshot("a", dec!(89000))).is_empty());
        assert!(!g.state(&ContenderId::new("a")).unwrap().is_killed());
        assert_eq!(approved(&g.on_signal(signal("a", Side::Buy, dec!(100)))).len(), 1);
    }

    #[test]
    fn test_new_day_reopens_session() {
        let mut g = guardian();
        let mut snap = snapshot("a", dec!(100000));
        snap.timestamp = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        g.on_snapshot(&snap);
        snap.equity = dec!(98000);
        g.on_snapshot(&snap);

        snap.timestamp = snap.timestamp + Duration::days(1);
        snap.equity = dec!(96000);
        // 2k down on the new session, under the 3% limit
        assert!(g.on_snapshot(&snap).is_empty());
        snap.equity = dec!(95000);
        assert!(g.on_snapshot(&snap).is_empty());
        let s = g.state(&ContenderId::new("a")).unwrap();
        assert_eq!(s.daily_pnl(), dec!(-1000));
    }

    #[test]
    fn test_contenders_isolated() {
        let mut g = guardian();
        g.on_snapshot(&snapshot("a", dec!(100000)));
        g.on_snapshot(&snapshot("b", dec!(100000)));
        g.on_snapshot(&snapshot("a", dec!(50000)));
        assert!(g.on_signal(signal("a", Side::Buy, dec!(100))).is_empty());
        assert_eq!(approved(&g.on_signal(signal("b", Side::Buy, dec!(100)))).len(), 1);
    }

    #[tokio::test]
    async fn test_run_publishes_to_sink() {
        let (in_tx, in_rx) = flume::unbounded();
        let (out_tx, out_rx) = flume::unbounded::<OutboundEvent>();
        let handle = tokio::spawn(guardian().run(in_rx, out_tx));

        in_tx
            .send_async(GuardianInput::Snapshot(snapshot("a", dec!(100000))))
            .await
            .unwrap();
        in_tx
            .send_async(GuardianInput::Signal(signal("a", Side::Buy, dec!(100))))
            .await
            .unwrap();
        drop(in_tx);
        handle.await.unwrap();

        let events: Vec<_> = out_rx.drain().collect();
        assert_eq!(approved(&events).len(), 1);
    }
}

//! End-to-end: signal -> risk -> validation -> simulated fill -> ledger -> snapshot.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use aleph_arena::core::{
    ApprovedSignal, ContenderId, ControlKind, InboundMessage, MarketPrice, OrderIntent,
    OutboundEvent, Side, Symbol,
};
use aleph_arena::ipc::Channels;
use aleph_arena::{ArenaConfig, ExecutionRouter, RiskEngine, RiskGuardian};

fn config() -> ArenaConfig {
    let mut config = ArenaConfig::default();
    config.simulation.apply_latency = false;
    config.arena.snapshot_interval_ms = 50;
    // 0.2% of 100k over a 2% stop at $100: 100 shares, $10k notional
    config.risk.risk_per_trade_pct = dec!(0.002);
    config
}

fn signal(id: &str, side: Side, price: Decimal) -> ApprovedSignal {
    ApprovedSignal {
        contender_id: ContenderId::new(id),
        symbol: Symbol::new("SPY"),
        side,
        confidence: 0.8,
        decision_price: price,
        signal_timestamp: Utc::now(),
        qty: None,
    }
}

#[tokio::test]
async fn test_contender_a_buy_ten_at_hundred() {
    let config = config();
    let engine = RiskEngine::new(config.risk.clone());
    let mut state = engine.new_state(ContenderId::new("A"));
    engine.update_account_state(&mut state, dec!(100000), Decimal::ZERO);

    let sig = signal("A", Side::Buy, dec!(100));
    engine.validate_signal(&state, &sig).unwrap();
    assert!(!engine.check_kill_switch(&mut state));

    let (tx, events) = flume::unbounded();
    let router = ExecutionRouter::new(&config, Arc::new(tx), None);
    let order = OrderIntent::new(
        sig.contender_id.clone(),
        sig.symbol.clone(),
        Side::Buy,
        dec!(10),
        sig.decision_price,
        sig.signal_timestamp,
    );
    router.submit(order.clone()).await.unwrap();

    let fill = match events.recv_async().await.unwrap() {
        OutboundEvent::FillEvent(fill) => fill,
        other => panic!("expected fill, got {:?}", other),
    };
    assert_eq!(fill.order_id, Some(order.order_id));
    assert_eq!(fill.qty, dec!(10));
    assert!(fill.fill_price >= dec!(100));

    router.update_price(MarketPrice {
        symbol: Symbol::new("SPY"),
        price: dec!(105),
    });
    let snap = router.snapshot(&ContenderId::new("A")).await.unwrap().unwrap();
    assert_eq!(snap.cash, dec!(100000) - dec!(10) * fill.fill_price);
    assert_eq!(snap.open_positions, 1);
    assert_eq!(snap.equity, snap.cash + dec!(1050));
    assert_eq!(snap.trades, 1);
    assert_eq!(router.pending_count(), 0);
}

/// Runs the outbound side like the binary does, but records what it sees.
struct Harness {
    channels: Channels,
    events: flume::Receiver<OutboundEvent>,
    seen: Vec<OutboundEvent>,
}

impl Harness {
    fn start(config: ArenaConfig) -> Self {
        let (events_tx, events) = flume::unbounded();
        let (guardian_tx, guardian_rx) = flume::unbounded();
        let (router_tx, router_rx) = flume::unbounded();

        let guardian = RiskGuardian::new(
            RiskEngine::new(config.risk.clone()),
            config.arena.starting_cash,
            None,
        );
        tokio::spawn(guardian.run(guardian_rx, events_tx.clone()));
        let router = Arc::new(ExecutionRouter::new(&config, Arc::new(events_tx), None));
        tokio::spawn(router.run(router_rx));

        Self {
            channels: Channels {
                guardian: guardian_tx,
                router: router_tx,
            },
            events,
            seen: Vec::new(),
        }
    }

    async fn send(&self, msg: InboundMessage) {
        self.channels.dispatch(msg).await.unwrap();
    }

    /// Pump events back into the pipeline until one matches.
    async fn until<F: Fn(&OutboundEvent) -> bool>(&mut self, pred: F) -> OutboundEvent {
        let wait = async {
            loop {
                let event = self.events.recv_async().await.unwrap();
                self.channels.feed_back(&event).await.unwrap();
                self.seen.push(event.clone());
                if pred(&event) {
                    return event;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("pipeline stalled")
    }

    /// Pump for a fixed window, returning everything seen.
    async fn drain_for(&mut self, window: Duration) -> Vec<OutboundEvent> {
        let mut out = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Ok(event)) = tokio::time::timeout_at(deadline, self.events.recv_async()).await {
            self.channels.feed_back(&event).await.unwrap();
            out.push(event);
        }
        out
    }
}

#[tokio::test]
async fn test_full_pipeline_trips_kill_switch_and_liquidates() {
    let mut h = Harness::start(config());

    h.send(InboundMessage::ApprovedSignal(signal("A", Side::Buy, dec!(100))))
        .await;
    let approved = h
        .until(|e| matches!(e, OutboundEvent::ApprovedOrder(_)))
        .await;
    let OutboundEvent::ApprovedOrder(order) = approved else {
        unreachable!()
    };
    assert_eq!(order.qty, dec!(100));

    let filled = h
        .until(|e| matches!(e, OutboundEvent::FillEvent(f) if f.side == Side::Buy))
        .await;
    let OutboundEvent::FillEvent(fill) = filled else {
        unreachable!()
    };
    assert!(fill.fill_price >= dec!(100));

    // Mark the position down 50%: ~5k loss against a 3k daily limit
    h.send(InboundMessage::MarketPrice(MarketPrice {
        symbol: Symbol::new("SPY"),
        price: dec!(50),
    }))
    .await;

    let control = h
        .until(|e| matches!(e, OutboundEvent::ControlCommand(_)))
        .await;
    let OutboundEvent::ControlCommand(cmd) = control else {
        unreachable!()
    };
    assert_eq!(cmd.command, ControlKind::LiquidateAll);
    assert_eq!(cmd.contender_id.as_str(), "A");

    let sold = h
        .until(|e| matches!(e, OutboundEvent::FillEvent(f) if f.side == Side::Sell))
        .await;
    let OutboundEvent::FillEvent(sell) = sold else {
        unreachable!()
    };
    assert_eq!(sell.qty, dec!(100));
    assert!(sell.fill_price <= dec!(50));
    assert!(sell.realized_pnl < Decimal::ZERO);

    let flat = h
        .until(|e| matches!(e, OutboundEvent::PortfolioSnapshot(s) if s.open_positions == 0))
        .await;
    let OutboundEvent::PortfolioSnapshot(snap) = flat else {
        unreachable!()
    };
    assert!(snap.pnl < dec!(-3000));
    assert!(snap.max_drawdown_pct > 0.0);

    // Killed: further signals are blocked
    h.send(InboundMessage::ApprovedSignal(signal("A", Side::Buy, dec!(50))))
        .await;
    let after = h.drain_for(Duration::from_millis(300)).await;
    assert!(!after.iter().any(|e| matches!(e, OutboundEvent::ApprovedOrder(_))));
    assert_eq!(
        h.seen
            .iter()
            .filter(|e| matches!(e, OutboundEvent::ControlCommand(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_contenders_do_not_share_ledgers() {
    let mut h = Harness::start(config());

    h.send(InboundMessage::ApprovedSignal(signal("A", Side::Buy, dec!(100))))
        .await;
    h.until(|e| matches!(e, OutboundEvent::FillEvent(f) if f.contender_id.as_str() == "A"))
        .await;

    let first = h
        .until(|e| matches!(e, OutboundEvent::PortfolioSnapshot(s) if s.contender_id.as_str() == "A"))
        .await;
    let OutboundEvent::PortfolioSnapshot(a_snap) = first else {
        unreachable!()
    };
    assert_eq!(a_snap.open_positions, 1);

    h.send(InboundMessage::ApprovedSignal(signal("B", Side::Sell, dec!(100))))
        .await;
    // B holds nothing: its sell is refused by B's ledger, A is untouched
    let rejected = h
        .until(|e| matches!(e, OutboundEvent::OrderRejected(r) if r.contender_id.as_str() == "B"))
        .await;
    let OutboundEvent::OrderRejected(r) = rejected else {
        unreachable!()
    };
    assert_eq!(r.reason, "ledger_invariant");

    let snap = h
        .until(|e| matches!(e, OutboundEvent::PortfolioSnapshot(s) if s.contender_id.as_str() == "A"))
        .await;
    let OutboundEvent::PortfolioSnapshot(a_after) = snap else {
        unreachable!()
    };
    assert_eq!(a_after.open_positions, 1);
    assert_eq!(a_after.cash, a_snap.cash);
}

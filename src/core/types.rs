//! Core types - Strong typing for the arena message contracts

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of one contender (strategy/model) owning an isolated ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContenderId(String);

impl ContenderId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContenderId {
    fn from(s: &str) -> Self {
        ContenderId::new(s)
    }
}

/// Tradeable symbol (e.g., "SPY")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Symbol::new(s)
    }
}

impl From<Symbol> for String {
    fn from(s: Symbol) -> Self {
        s.0
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Predicted or realised price direction, used by the prediction window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => Direction::Up,
            Side::Sell => Direction::Down,
        }
    }
}

/// Inbound signal that already survived the upstream model layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovedSignal {
    pub contender_id: ContenderId,
    pub symbol: Symbol,
    pub side: Side,
    pub confidence: f64,
    pub decision_price: Decimal,
    pub signal_timestamp: DateTime<Utc>,
    /// Explicit quantity, honoured for SELL signals that close a known holding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qty: Option<Decimal>,
}

/// Order intent created by the risk engine on approval. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub order_id: Uuid,
    pub contender_id: ContenderId,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub decision_price: Decimal,
    pub signal_timestamp: DateTime<Utc>,
}

impl OrderIntent {
    pub fn new(
        contender_id: ContenderId,
        symbol: Symbol,
        side: Side,
        qty: Decimal,
        decision_price: Decimal,
        signal_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            contender_id,
            symbol,
            side,
            qty,
            decision_price,
            signal_timestamp,
        }
    }
}

/// Raw execution result as reported by a broker or simulator. Either id may be
/// missing; the router resolves ownership by precedence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub contender_id: Option<ContenderId>,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub fill_price: Decimal,
    #[serde(default = "Utc::now")]
    pub fill_timestamp: DateTime<Utc>,
}

/// A fill bound to exactly one ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: Option<Uuid>,
    pub contender_id: ContenderId,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub fill_price: Decimal,
    pub fill_timestamp: DateTime<Utc>,
    /// Filled in by the ledger on SELL fills; zero on BUY.
    pub realized_pnl: Decimal,
}

impl Fill {
    /// `None` when `qty * fill_price` overflows.
    pub fn notional(&self) -> Option<Decimal> {
        self.qty.checked_mul(self.fill_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FillStatus {
    Filled,
    Rejected,
}

/// Outbound fill-event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillEvent {
    pub order_id: Option<Uuid>,
    pub contender_id: ContenderId,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub fill_price: Decimal,
    pub fill_timestamp: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub status: FillStatus,
}

impl From<Fill> for FillEvent {
    fn from(fill: Fill) -> Self {
        Self {
            order_id: fill.order_id,
            contender_id: fill.contender_id,
            symbol: fill.symbol,
            side: fill.side,
            qty: fill.qty,
            fill_price: fill.fill_price,
            fill_timestamp: fill.fill_timestamp,
            realized_pnl: fill.realized_pnl,
            status: FillStatus::Filled,
        }
    }
}

/// Rejected order, reported back with a machine-readable reason code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRejection {
    pub order_id: Option<Uuid>,
    pub contender_id: ContenderId,
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub reason: String,
    pub detail: String,
    pub status: FillStatus,
    pub timestamp: DateTime<Utc>,
}

/// Periodic, immutable view of one ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub contender_id: ContenderId,
    pub cash: Decimal,
    pub equity: Decimal,
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub realized_pnl: Decimal,
    /// Every applied fill, BUY and SELL.
    pub trades: u64,
    /// SELL fills; `win_rate = wins / closed_trades`.
    #[serde(default)]
    pub closed_trades: u64,
    pub wins: u64,
    pub win_rate: Decimal,
    pub open_positions: usize,
    pub max_drawdown_pct: f64,
    pub sortino: Option<f64>,
    pub calmar: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlKind {
    LiquidateAll,
    ActivateManualApproval,
}

impl std::fmt::Display for ControlKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlKind::LiquidateAll => write!(f, "LIQUIDATE_ALL"),
            ControlKind::ActivateManualApproval => write!(f, "ACTIVATE_MANUAL_APPROVAL"),
        }
    }
}

/// Control command published by the risk engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command: ControlKind,
    pub contender_id: ContenderId,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl ControlCommand {
    pub fn new(command: ControlKind, contender_id: ContenderId, reason: impl Into<String>) -> Self {
        Self {
            command,
            contender_id,
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatorAction {
    ResetKillSwitch,
    ResetManualApproval,
}

/// Out-of-band operator instruction for one contender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorCommand {
    pub command: OperatorAction,
    pub contender_id: ContenderId,
}

/// Last traded price for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketPrice {
    pub symbol: Symbol,
    pub price: Decimal,
}

/// Everything the core accepts from external collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum InboundMessage {
    ApprovedSignal(ApprovedSignal),
    MarketPrice(MarketPrice),
    ExecutionResult(ExecutionResult),
    OperatorCommand(OperatorCommand),
}

/// Everything the core publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "payload", rename_all = "snake_case")]
pub enum OutboundEvent {
    ApprovedOrder(OrderIntent),
    ControlCommand(ControlCommand),
    FillEvent(FillEvent),
    OrderRejected(OrderRejection),
    PortfolioSnapshot(PortfolioSnapshot),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_is_uppercased_on_deserialize() {
        let sym: Symbol = serde_json::from_str("\"spy\"").unwrap();
        assert_eq!(sym.as_str(), "SPY");
    }

    #[test]
    fn test_side_accepts_both_cases() {
        let a: Side = serde_json::from_str("\"BUY\"").unwrap();
        let b: Side = serde_json::from_str("\"sell\"").unwrap();
        assert_eq!(a, Side::Buy);
        assert_eq!(b, Side::Sell);
        assert_eq!(serde_json::to_string(&Side::Sell).unwrap(), "\"SELL\"");
    }

    #[test]
    fn test_inbound_signal_decodes_with_decimal_strings() {
        let line = r#"{"channel":"approved_signal","payload":{
            "contender_id":"sma_cross","symbol":"spy","side":"BUY","confidence":0.7,
            "decision_price":"100.25","signal_timestamp":"2026-01-05T14:30:00Z"}}"#;
        let msg: InboundMessage = serde_json::from_str(line).unwrap();
        match msg {
            InboundMessage::ApprovedSignal(sig) => {
                assert_eq!(sig.decision_price, dec!(100.25));
                assert_eq!(sig.contender_id.as_str(), "sma_cross");
                assert!(sig.qty.is_none());
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_execution_result_ids_are_optional() {
        let line = r#"{"channel":"execution_result","payload":{
            "symbol":"AAPL","side":"SELL","qty":"5","fill_price":"190.10"}}"#;
        let msg: InboundMessage = serde_json::from_str(line).unwrap();
        let InboundMessage::ExecutionResult(res) = msg else {
            panic!("expected execution result");
        };
        assert!(res.order_id.is_none());
        assert!(res.contender_id.is_none());
    }

    #[test]
    fn test_control_command_wire_name() {
        let cmd = ControlCommand::new(ControlKind::LiquidateAll, "a".into(), "drawdown");
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["command"], "LIQUIDATE_ALL");
    }
}

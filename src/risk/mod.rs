//! Risk Engine - per-contender kill switch, manual-approval mode and
//! fixed-fractional sizing.
//!
//! `RiskEngine` holds only policy. Every call takes the contender's
//! `RiskState` explicitly, so contenders never share mutable state.

pub mod guardian;
pub mod window;

use rust_decimal::Decimal;

use crate::core::config::RiskConfig;
use crate::core::{ApprovedSignal, ContenderId, Direction};
use crate::execution::validator::RejectReason;
use window::{Prediction, PredictionWindow};

/// Risk state owned by exactly one contender. KILLED and MANUAL_APPROVAL are
/// independent flags.
#[derive(Debug, Clone)]
pub struct RiskState {
    contender_id: ContenderId,
    kill_switch_active: bool,
    manual_approval_active: bool,
    starting_equity: Decimal,
    current_equity: Decimal,
    daily_pnl: Decimal,
    consecutive_losses: u32,
    window: PredictionWindow,
}

impl RiskState {
    pub fn new(contender_id: ContenderId, window_size: usize) -> Self {
        Self {
            contender_id,
            kill_switch_active: false,
            manual_approval_active: false,
            starting_equity: Decimal::ZERO,
            current_equity: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            consecutive_losses: 0,
            window: PredictionWindow::new(window_size),
        }
    }

    pub fn contender_id(&self) -> &ContenderId {
        &self.contender_id
    }

    pub fn is_killed(&self) -> bool {
        self.kill_switch_active
    }

    pub fn is_manual_approval(&self) -> bool {
        self.manual_approval_active
    }

    pub fn starting_equity(&self) -> Decimal {
        self.starting_equity
    }

    pub fn current_equity(&self) -> Decimal {
        self.current_equity
    }

    pub fn daily_pnl(&self) -> Decimal {
        self.daily_pnl
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn predictions(&self) -> &PredictionWindow {
        &self.window
    }
}

#[derive(Debug, Clone)]
pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn new_state(&self, contender_id: ContenderId) -> RiskState {
        RiskState::new(contender_id, self.config.window_size)
    }

    /// Record equity and daily pnl. Anchors `starting_equity` the first time.
    pub fn update_account_state(&self, state: &mut RiskState, equity: Decimal, daily_pnl: Decimal) {
        state.current_equity = equity;
        state.daily_pnl = daily_pnl;
        if state.starting_equity.is_zero() {
            state.starting_equity = equity - daily_pnl;
        }
    }

    /// Start a new trading session anchored at `equity`.
    pub fn begin_session(&self, state: &mut RiskState, equity: Decimal) {
        state.starting_equity = equity;
        state.current_equity = equity;
        state.daily_pnl = Decimal::ZERO;
    }

    /// Trips on `daily_pnl <= -max_daily_loss_pct * starting_equity` or on the
    /// consecutive-loss limit. Idempotent once tripped.
    pub fn check_kill_switch(&self, state: &mut RiskState) -> bool {
        if state.kill_switch_active {
            return true;
        }
        if state.starting_equity <= Decimal::ZERO {
            return false;
        }

        let loss_limit = -self.config.max_daily_loss_pct * state.starting_equity;
        if state.daily_pnl <= loss_limit {
            state.kill_switch_active = true;
            tracing::error!(
                contender = %state.contender_id,
                daily_pnl = %state.daily_pnl,
                limit = %loss_limit,
                "🛑 KILL SWITCH: daily loss limit breached"
            );
            return true;
        }

        if state.consecutive_losses >= self.config.max_consecutive_losses {
            state.kill_switch_active = true;
            tracing::error!(
                contender = %state.contender_id,
                losses = state.consecutive_losses,
                "🛑 KILL SWITCH: consecutive loss limit reached"
            );
            return true;
        }

        false
    }

    /// A loss extends the streak; a win or breakeven ends it.
    pub fn record_trade_result(&self, state: &mut RiskState, pnl: Decimal) {
        if pnl < Decimal::ZERO {
            state.consecutive_losses += 1;
        } else {
            state.consecutive_losses = 0;
        }
    }

    /// `floor(equity * risk_per_trade / |entry - stop|)`, zero when killed or
    /// when the stop sits on the entry.
    pub fn calculate_position_size(&self, state: &RiskState, entry: Decimal, stop: Decimal) -> Decimal {
        if state.kill_switch_active {
            return Decimal::ZERO;
        }
        let risk_per_share = (entry - stop).abs();
        if risk_per_share.is_zero() {
            return Decimal::ZERO;
        }
        // A size too large to represent is no size at all.
        state
            .current_equity
            .checked_mul(self.config.risk_per_trade_pct)
            .and_then(|risk_amount| risk_amount.checked_div(risk_per_share))
            .map_or(Decimal::ZERO, |qty| qty.floor().max(Decimal::ZERO))
    }

    /// Blocks while killed or in manual-approval mode. Nothing is queued.
    pub fn validate_signal(&self, state: &RiskState, signal: &ApprovedSignal) -> Result<(), RejectReason> {
        if state.kill_switch_active {
            tracing::warn!(contender = %signal.contender_id, symbol = %signal.symbol, "signal blocked: kill switch active");
            return Err(RejectReason::KillSwitchActive);
        }
        if state.manual_approval_active {
            tracing::warn!(contender = %signal.contender_id, symbol = %signal.symbol, "signal blocked: manual approval mode");
            return Err(RejectReason::ManualApprovalActive);
        }
        Ok(())
    }

    pub fn record_prediction(&self, state: &mut RiskState, predicted: Direction, outcome: Direction, ret: f64) {
        state.window.push(Prediction {
            predicted,
            outcome,
            ret,
        });
    }

    /// Annualised mean over sample standard deviation of windowed returns.
    pub fn rolling_sharpe(&self, state: &RiskState) -> Option<f64> {
        let returns: Vec<f64> = state.window.returns().collect();
        if returns.len() < 5 {
            return None;
        }
        let n = returns.len() as f64;
        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let stdev = variance.sqrt();
        if stdev == 0.0 || !stdev.is_finite() {
            return None;
        }
        Some(mean / stdev * self.config.periods_per_year.sqrt())
    }

    pub fn rolling_accuracy(&self, state: &RiskState) -> Option<f64> {
        let total = state.window.len();
        if total < 5 {
            return None;
        }
        Some(state.window.correct() as f64 / total as f64)
    }

    /// Enters manual-approval mode when rolling Sharpe or accuracy falls
    /// below its floor. Returns true only on the transition.
    pub fn check_model_performance(&self, state: &mut RiskState) -> bool {
        if state.manual_approval_active {
            return false;
        }

        let sharpe = self.rolling_sharpe(state);
        let accuracy = self.rolling_accuracy(state);
        let sharpe_low = sharpe.is_some_and(|s| s < self.config.rollback_min_sharpe);
        let accuracy_low = accuracy.is_some_and(|a| a < self.config.rollback_min_accuracy);

        if sharpe_low || accuracy_low {
            state.manual_approval_active = true;
            tracing::warn!(
                contender = %state.contender_id,
                ?sharpe,
                ?accuracy,
                "⚠️ Model performance degraded, manual approval required"
            );
            return true;
        }
        false
    }

    /// Clears KILLED, re-anchors the session at current equity and ends the
    /// loss streak. Manual approval is untouched.
    pub fn reset_kill_switch(&self, state: &mut RiskState) {
        state.kill_switch_active = false;
        state.starting_equity = state.current_equity;
        state.daily_pnl = Decimal::ZERO;
        state.consecutive_losses = 0;
        tracing::info!(contender = %state.contender_id, equity = %state.current_equity, "Kill switch reset");
    }

    pub fn reset_manual_approval(&self, state: &mut RiskState) {
        state.manual_approval_active = false;
        tracing::info!(contender = %state.contender_id, "Manual approval mode cleared");
    }
}

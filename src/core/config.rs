//! Configuration - Type-safe, validated config
//!
//! Loads from `config.toml` (or the path in `ARENA_CONFIG`). Thresholds are
//! checked once at startup; a bad file stops the process before any order flows.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    pub arena: ArenaSettings,
    pub risk: RiskConfig,
    pub limits: OrderLimits,
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub audit: Option<AuditConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaSettings {
    /// Cash each contender's ledger opens with
    pub starting_cash: Decimal,

    /// Unix socket for inbound JSON-lines messages
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// How often portfolio snapshots are published
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_ms: u64,
}

/// Risk engine thresholds. All fractions are 0.0-1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Daily loss (fraction of starting equity) that trips the kill switch
    pub max_daily_loss_pct: Decimal,

    /// Consecutive losing trades that trip the kill switch
    pub max_consecutive_losses: u32,

    /// Equity fraction risked per trade (fixed-fractional sizing)
    pub risk_per_trade_pct: Decimal,

    /// Rolling Sharpe floor before manual approval
    pub rollback_min_sharpe: f64,

    /// Rolling accuracy floor before manual approval
    pub rollback_min_accuracy: f64,

    /// Prediction window capacity
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Annualisation factor for the rolling Sharpe
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,

    /// Approved signals between model-performance checks
    #[serde(default = "default_check_interval")]
    pub performance_check_interval: u64,

    /// Distance of the sizing stop from the decision price
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: Decimal,
}

/// Static limits enforced by the order validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLimits {
    pub max_order_value: Decimal,
    pub max_position_value: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Deterministic slippage floor in basis points
    pub base_bps: f64,

    /// Std-dev of the noise term at the reference size, in basis points
    #[serde(default = "default_noise_bps")]
    pub noise_bps: f64,

    /// Expected impact at the reference size, in basis points
    #[serde(default = "default_impact_bps")]
    pub impact_bps: f64,

    /// Order size at which noise and impact take their nominal values
    #[serde(default = "default_size_reference")]
    pub size_reference: f64,

    /// Hard cap on total slippage
    #[serde(default = "default_max_slippage_bps")]
    pub max_slippage_bps: f64,

    /// Decimal places of simulated fill prices
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,

    pub min_latency_ms: u64,
    pub max_latency_ms: u64,

    /// Await the simulated delay before applying the fill
    #[serde(default = "default_true")]
    pub apply_latency: bool,

    /// Base seed; each contender derives its own stream from it
    #[serde(default)]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Pending orders older than this are considered abandoned
    pub pending_ttl_secs: u64,

    /// How often the pending-order map is swept
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSONL file the audit trail is appended to
    pub path: PathBuf,
}

fn default_socket_path() -> String {
    "/tmp/aleph-arena.sock".to_string()
}
fn default_snapshot_interval() -> u64 {
    2000
}
fn default_window_size() -> usize {
    20
}
fn default_periods_per_year() -> f64 {
    252.0
}
fn default_check_interval() -> u64 {
    10
}
fn default_stop_loss_pct() -> Decimal {
    Decimal::new(2, 2)
}
fn default_noise_bps() -> f64 {
    1.0
}
fn default_impact_bps() -> f64 {
    0.5
}
fn default_size_reference() -> f64 {
    10_000.0
}
fn default_max_slippage_bps() -> f64 {
    500.0
}
fn default_price_precision() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 300,
            sweep_interval_secs: 30,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: Decimal::new(3, 2),
            max_consecutive_losses: 5,
            risk_per_trade_pct: Decimal::new(1, 2),
            rollback_min_sharpe: 0.5,
            rollback_min_accuracy: 0.5,
            window_size: default_window_size(),
            periods_per_year: default_periods_per_year(),
            performance_check_interval: default_check_interval(),
            stop_loss_pct: default_stop_loss_pct(),
        }
    }
}

impl Default for OrderLimits {
    fn default() -> Self {
        Self {
            max_order_value: Decimal::from(50_000),
            max_position_value: Decimal::from(25_000),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            base_bps: 5.0,
            noise_bps: default_noise_bps(),
            impact_bps: default_impact_bps(),
            size_reference: default_size_reference(),
            max_slippage_bps: default_max_slippage_bps(),
            price_precision: default_price_precision(),
            min_latency_ms: 50,
            max_latency_ms: 200,
            apply_latency: true,
            seed: 0,
        }
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            arena: ArenaSettings {
                starting_cash: Decimal::from(100_000),
                socket_path: default_socket_path(),
                snapshot_interval_ms: default_snapshot_interval(),
            },
            risk: RiskConfig::default(),
            limits: OrderLimits::default(),
            simulation: SimulationConfig::default(),
            router: RouterConfig::default(),
            audit: None,
        }
    }
}

impl RouterConfig {
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

impl ArenaConfig {
    /// Load from TOML file and validate
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: ArenaConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject thresholds the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let r = &self.risk;
        if self.arena.starting_cash <= Decimal::ZERO {
            return Err(Error::Config("arena.starting_cash must be positive".into()));
        }
        if r.max_daily_loss_pct <= Decimal::ZERO || r.max_daily_loss_pct >= Decimal::ONE {
            return Err(Error::Config("risk.max_daily_loss_pct must be in (0, 1)".into()));
        }
        if r.risk_per_trade_pct <= Decimal::ZERO || r.risk_per_trade_pct >= Decimal::ONE {
            return Err(Error::Config("risk.risk_per_trade_pct must be in (0, 1)".into()));
        }
        if r.stop_loss_pct <= Decimal::ZERO || r.stop_loss_pct >= Decimal::ONE {
            return Err(Error::Config("risk.stop_loss_pct must be in (0, 1)".into()));
        }
        if r.max_consecutive_losses == 0 {
            return Err(Error::Config("risk.max_consecutive_losses must be at least 1".into()));
        }
        if r.window_size < 5 {
            return Err(Error::Config(format!(
                "risk.window_size {} is below the 5-sample minimum for rolling metrics",
                r.window_size
            )));
        }
        if !(r.periods_per_year > 0.0) {
            return Err(Error::Config("risk.periods_per_year must be positive".into()));
        }
        if !(0.0..=1.0).contains(&r.rollback_min_accuracy) {
            return Err(Error::Config("risk.rollback_min_accuracy must be in [0, 1]".into()));
        }
        if r.performance_check_interval == 0 {
            return Err(Error::Config("risk.performance_check_interval must be at least 1".into()));
        }
        if self.limits.max_order_value <= Decimal::ZERO || self.limits.max_position_value <= Decimal::ZERO {
            return Err(Error::Config("limits must be positive".into()));
        }
        let s = &self.simulation;
        if s.base_bps < 0.0 || s.noise_bps < 0.0 || s.impact_bps < 0.0 {
            return Err(Error::Config("simulation bps values must be non-negative".into()));
        }
        // A negative cap flips fill direction; 10000 bps would zero a SELL.
        if !(0.0..10_000.0).contains(&s.max_slippage_bps) {
            return Err(Error::Config(format!(
                "simulation.max_slippage_bps {} must be in [0, 10000)",
                s.max_slippage_bps
            )));
        }
        if !(s.size_reference > 0.0) {
            return Err(Error::Config("simulation.size_reference must be positive".into()));
        }
        if s.min_latency_ms > s.max_latency_ms {
            return Err(Error::Config(format!(
                "simulation latency bounds inverted: {} > {}",
                s.min_latency_ms, s.max_latency_ms
            )));
        }
        if self.router.pending_ttl_secs == 0 || self.router.sweep_interval_secs == 0 {
            return Err(Error::Config("router intervals must be positive".into()));
        }
        Ok(())
    }

    /// Load from `ARENA_CONFIG` or `config.toml`, falling back to defaults
    /// only when no file exists at all.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var("ARENA_CONFIG") {
            return Self::load(Path::new(&path));
        }

        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];

        for path in &candidates {
            let p = Path::new(path);
            if p.exists() {
                tracing::info!("📋 Loaded config from {}", path);
                return Self::load(p);
            }
        }

        tracing::warn!("⚠️ No config.toml found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }
}

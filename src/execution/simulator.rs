//! Fill Simulator - directional slippage and latency with seeded RNG.
//!
//! Slippage = |base + impact(qty) + noise(qty)|, capped, and always applied
//! against the trader: BUY fills at or above the decision price, SELL fills
//! at or below. Rounding to the price grid is directional too, so the bound
//! survives quantisation. Latency is drawn from a separate stream and never
//! touches the price.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use std::f64::consts::PI;
use std::time::Duration;

use crate::core::config::SimulationConfig;
use crate::core::{ContenderId, Side};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedFill {
    pub fill_price: Decimal,
    pub delay: Duration,
    /// Applied slippage in basis points
    pub slippage_bps: f64,
}

pub struct FillSimulator {
    config: SimulationConfig,
    price_rng: StdRng,
    latency_rng: StdRng,
}

/// Box-Muller on a seeded stream.
fn sample_normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = 1.0 - rng.r#gen::<f64>();
    let u2: f64 = rng.r#gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
    mean + std * z
}

/// FNV-1a, so each contender gets a stable stream from one base seed.
fn contender_seed(base: u64, id: &ContenderId) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in id.as_str().bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    base ^ hash
}

impl FillSimulator {
    pub fn new(config: SimulationConfig, seed: u64) -> Self {
        Self {
            config,
            price_rng: StdRng::seed_from_u64(seed),
            latency_rng: StdRng::seed_from_u64(seed.wrapping_add(0x9e37_79b9_7f4a_7c15)),
        }
    }

    pub fn for_contender(config: SimulationConfig, id: &ContenderId) -> Self {
        let seed = contender_seed(config.seed, id);
        Self::new(config, seed)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn simulate(&mut self, decision_price: Decimal, side: Side, qty: Decimal) -> SimulatedFill {
        let base_bps = self.config.base_bps;
        self.simulate_with_base(decision_price, side, qty, base_bps)
    }

    /// Same as `simulate` with an explicit deterministic component.
    pub fn simulate_with_base(
        &mut self,
        decision_price: Decimal,
        side: Side,
        qty: Decimal,
        base_bps: f64,
    ) -> SimulatedFill {
        let delay = self.sample_delay();
        if decision_price <= Decimal::ZERO {
            return SimulatedFill {
                fill_price: decision_price,
                delay,
                slippage_bps: 0.0,
            };
        }

        let size = (qty.abs().to_f64().unwrap_or(0.0) / self.config.size_reference).max(0.0);
        let impact_bps = self.config.impact_bps * size;
        let noise_std = self.config.noise_bps * (1.0 + size).sqrt();
        let noise_bps = sample_normal(&mut self.price_rng, 0.0, noise_std);

        let slippage_bps = (base_bps + impact_bps + noise_bps)
            .abs()
            .min(self.config.max_slippage_bps);
        let slippage = Decimal::from_f64(slippage_bps)
            .map(|bps| bps.round_dp(4) / Decimal::from(10_000))
            .unwrap_or(Decimal::ZERO);

        let dp = self.config.price_precision;
        // A BUY too close to Decimal::MAX to slip keeps its decision price.
        let fill_price = match side {
            Side::Buy => decision_price
                .checked_mul(Decimal::ONE + slippage)
                .unwrap_or(decision_price)
                .round_dp_with_strategy(dp, RoundingStrategy::AwayFromZero),
            Side::Sell => (decision_price * (Decimal::ONE - slippage))
                .round_dp_with_strategy(dp, RoundingStrategy::ToZero),
        };

        SimulatedFill {
            fill_price,
            delay,
            slippage_bps,
        }
    }

    fn sample_delay(&mut self) -> Duration {
        let (lo, hi) = (self.config.min_latency_ms, self.config.max_latency_ms);
        let ms = if hi > lo {
            self.latency_rng.gen_range(lo..=hi)
        } else {
            lo
        };
        Duration::from_millis(ms)
    }
}

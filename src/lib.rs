//! AlephArena - Core Library
//! Risk-gated execution pipeline for competing trading contenders

// Public modules
pub mod audit;
pub mod core;
pub mod execution;
pub mod ipc;
pub mod portfolio;
pub mod risk;

// Re-exports
pub use core::{ArenaConfig, Error, Result};
pub use execution::ExecutionRouter;
pub use portfolio::Portfolio;
pub use risk::guardian::RiskGuardian;
pub use risk::{RiskEngine, RiskState};

//! Error handling - Hierarchical errors for the arena core

use thiserror::Error;

use crate::execution::router::RoutingError;
use crate::execution::validator::RejectReason;
use crate::portfolio::LedgerError;

pub type Result<T> = std::result::Result<T, Error>;

/// Arena error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or invalid thresholds. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Rejected order. Reported back as a reason, never fatal.
    #[error("Validation error: {0}")]
    Validation(#[from] RejectReason),

    /// Ledger refused a mutation; an upstream gate was bypassed.
    #[error("Ledger invariant violated: {0}")]
    Ledger(#[from] LedgerError),

    /// Fill could not be tied to a ledger.
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// A component's inbound queue is gone
    #[error("Channel closed: {0}")]
    Channel(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl<T> From<flume::SendError<T>> for Error {
    fn from(e: flume::SendError<T>) -> Self {
        Error::Channel(e.to_string())
    }
}

//! Execution layer - validation, simulated fills and fill routing

pub mod desk;
pub mod order;
pub mod router;
pub mod simulator;
pub mod validator;

pub use desk::{LedgerHandle, PriceMap};
pub use order::OrderState;
pub use router::{ExecutionRouter, Route, RouterInput, RoutingError};
pub use simulator::{FillSimulator, SimulatedFill};
pub use validator::{OrderValidator, RejectReason};

//! Core module - Common types, config, and error handling

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::ArenaConfig;
pub use error::{Error, Result};
pub use traits::EventSink;
pub use types::*;

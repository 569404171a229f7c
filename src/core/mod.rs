//! Core types, errors and constants for the tracking engine

pub mod types;
pub mod constants;
pub mod error;

pub use types::*;
pub use constants::*;
pub use error::{DecodeError, MonitorError, MonitorResult, SolveError};

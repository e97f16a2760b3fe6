//! Infrastructure adapters and runtime bootstrap.

pub mod bus;
pub mod error;
pub mod fixtures;
pub mod side_store;
pub mod telemetry;

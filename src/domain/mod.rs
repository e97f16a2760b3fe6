//! Domain layer types and invariants.

pub mod avatar;
pub mod entities;
pub mod error;
pub mod normalize;
pub mod types;

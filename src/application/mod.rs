//! Collaborator ports and the error taxonomy shared by the cache engine.

pub mod error;
pub mod repos;

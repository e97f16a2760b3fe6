//! Rollcall: a coalescing, subscription-driven user-profile cache.
//!
//! The [`cache::ProfileSyncService`] sits between application code, a remote
//! profile store, a change bus and a durable snapshot side store.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

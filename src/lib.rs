//! Flyer Bot — deferred announcement dispatch for event flyers.

pub mod announce;
pub mod config;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod temporal;

//! Ember+ control-surface bridge
//!
//! Keeps a cache of device parameters in sync with a control-surface host:
//! parameter values become host variables and feedbacks, host actions become
//! parameter writes and matrix crosspoint operations.

pub mod batch;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod connection;
pub mod ember;
pub mod host;
pub mod instance;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use instance::EmberInstance;

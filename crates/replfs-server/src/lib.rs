//! Replica server state machine for ReplFS (`spec.md` §4.3).
//!
//! A [`ServerInstance`] owns one mount directory and the staging state for
//! every file currently open against it; [`ServerInstance::run`] drives it
//! from a [`replfs_transport::EventSource`] forever.

mod error;
mod run;
mod state;

pub use error::ServerError;
pub use state::ServerInstance;

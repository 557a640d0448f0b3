//! Bot runner — supervises long-running chat platform sessions.
//!
//! One [`supervisor::Supervisor`] owns a set of named workers, keeps each
//! alive under an unconditional restart policy, and tears all of them down
//! on SIGINT/SIGTERM or an explicit stop.

pub mod bots;
pub mod config;
pub mod error;
pub mod signals;
pub mod supervisor;
pub mod worker;

//! Connectivity loss recovery

pub mod backoff;
mod supervisor;

pub use backoff::ExponentialBackoff;
pub use supervisor::{RecoveryOutcome, RecoverySupervisor};

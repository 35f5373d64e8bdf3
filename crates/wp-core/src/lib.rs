//! wp-core: Core abstractions and configuration for wifi-provisioner
//!
//! This crate provides the shared state model, the driver/probe/tunnel
//! contracts and the configuration structures used by the radio driver
//! and the orchestrator daemon.

pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::{DriverError, FailureKind, ValidationError, WpError};
pub use types::{ConnectionState, NetworkInfo, PersistenceHealth, SessionInfo, SystemState};

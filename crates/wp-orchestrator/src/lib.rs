//! wp-orchestrator: WiFi provisioning daemon
//!
//! A device with a single WiFi radio either serves a setup access point or
//! is joined to a client network, never both. The orchestrator switches
//! between the two under one connection lock, the recovery supervisor
//! rejoins the saved network after a drop, and the tunnel supervisor keeps a
//! public URL to the local web UI while connected. All shared state lives in
//! the [`StateStore`].

pub mod connection;
pub mod provisioner;
pub mod recovery;
pub mod session;
pub mod store;
pub mod tunnel;

pub use connection::{ConnectError, ConnectionOrchestrator};
pub use provisioner::{Provisioner, ShutdownHook};
pub use recovery::RecoverySupervisor;
pub use store::{StateListener, StatePatch, StateStore, StoreEvent};
pub use tunnel::TunnelSupervisor;

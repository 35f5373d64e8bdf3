//! Reverse tunnels exposing the local web UI while connected

mod primary;
mod process;
mod secondary;
mod supervisor;

pub use primary::SystemdPrimary;
pub use process::ManagedChild;
pub use secondary::CommandProvider;
pub use supervisor::{TunnelError, TunnelSupervisor};

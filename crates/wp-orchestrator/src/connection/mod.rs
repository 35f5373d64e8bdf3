//! Client connection management

pub mod classify;
mod lock;
mod orchestrator;
pub mod password;
pub mod portal;
pub mod validate;

pub use lock::{ConnectionLock, ConnectionPermit};
pub use orchestrator::{ConnectError, ConnectionOrchestrator};
pub use portal::HttpProbe;

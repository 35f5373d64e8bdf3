//! wp-radio: Radio drivers for wifi-provisioner
//!
//! [`NmcliDriver`] drives NetworkManager through `nmcli` terse output.
//! [`FakeRadio`] is an in-memory single-radio model used by tests; it counts
//! every activation that would have put AP and client mode up together.

pub mod fake;
pub mod monitor;
pub mod nmcli;
pub mod parse;

pub use fake::FakeRadio;
pub use nmcli::NmcliDriver;

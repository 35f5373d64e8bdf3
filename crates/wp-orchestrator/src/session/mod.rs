//! Companion-UI session bookkeeping

mod cleanup;

pub use cleanup::{remove_expired_sessions, run_session_cleanup};

//! Stale session cleanup task
//!
//! Sessions are opened by the companion UI and touched on every request.
//! Sessions not seen within `max_age` are dropped from state.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use wp_core::config::SessionConfig;
use wp_core::time::{current_time_millis, is_expired};

use crate::store::{StatePatch, StateStore};

/// Run the session cleanup task until cancelled
pub async fn run_session_cleanup(store: Arc<StateStore>, config: SessionConfig, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(config.cleanup_interval);

    tracing::info!(
        "Starting session cleanup task (max age: {:?}, check interval: {:?})",
        config.max_age,
        config.cleanup_interval
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                remove_expired_sessions(&store, &config, current_time_millis()).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Session cleanup task shutting down");
                break;
            }
        }
    }
}

/// Remove sessions last seen more than `max_age` before `now`.
/// Returns the number removed.
pub async fn remove_expired_sessions(store: &StateStore, config: &SessionConfig, now: u64) -> usize {
    let state = store.get().await;
    let expired: Vec<String> = state
        .sessions
        .iter()
        .filter(|(_, info)| is_expired(info.last_seen, config.max_age, now))
        .map(|(id, _)| id.clone())
        .collect();

    if expired.is_empty() {
        return 0;
    }

    let count = expired.len();
    let patch = expired
        .into_iter()
        .fold(StatePatch::new(), |patch, id| patch.remove_session(id));
    store.update(patch).await;

    tracing::info!("Removed {} expired session(s)", count);
    count
}

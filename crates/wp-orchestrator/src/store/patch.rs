//! Partial updates to [`SystemState`]
//!
//! A patch names only the fields it changes. Nullable fields use
//! `Option<Option<T>>`: `None` leaves the field alone, `Some(None)` clears it.
//! Cross-field invariants are enforced by [`normalize`] after every merge, so
//! callers cannot leave the state inconsistent.

use wp_core::{ConnectionState, NetworkInfo, SessionInfo, SystemState};

/// A partial update merged by [`super::StateStore::update`]
#[derive(Debug, Clone, Default)]
pub struct StatePatch {
    pub connection_state: Option<ConnectionState>,
    pub network_info: Option<NetworkInfo>,
    pub tunnel_url: Option<Option<String>>,
    pub tunnel_provider: Option<Option<String>>,
    pub ap_password: Option<Option<String>>,
    pub ap_password_generated_at: Option<Option<u64>>,
    pub captive_portal_url: Option<Option<String>>,
    pub captive_portal_detected_at: Option<Option<u64>>,
    pub captive_portal_session_expires_at: Option<Option<u64>>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub connection_progress: Option<f32>,
    pub connection_status: Option<String>,
    pub touch_sessions: Vec<String>,
    pub remove_sessions: Vec<String>,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(mut self, state: ConnectionState) -> Self {
        self.connection_state = Some(state);
        self
    }

    pub fn network(mut self, info: NetworkInfo) -> Self {
        self.network_info = Some(info);
        self
    }

    pub fn tunnel(mut self, url: impl Into<String>, provider: impl Into<String>) -> Self {
        self.tunnel_url = Some(Some(url.into()));
        self.tunnel_provider = Some(Some(provider.into()));
        self
    }

    pub fn clear_tunnel(mut self) -> Self {
        self.tunnel_url = Some(None);
        self.tunnel_provider = Some(None);
        self
    }

    pub fn ap_password(mut self, password: impl Into<String>, generated_at: u64) -> Self {
        self.ap_password = Some(Some(password.into()));
        self.ap_password_generated_at = Some(Some(generated_at));
        self
    }

    /// Record a captive portal detected at `detected_at`, trusted until `expires_at`
    pub fn portal(mut self, url: impl Into<String>, detected_at: u64, expires_at: u64) -> Self {
        self.captive_portal_url = Some(Some(url.into()));
        self.captive_portal_detected_at = Some(Some(detected_at));
        self.captive_portal_session_expires_at = Some(Some(expires_at));
        self
    }

    pub fn clear_portal(mut self) -> Self {
        self.captive_portal_url = Some(None);
        self.captive_portal_detected_at = Some(None);
        self.captive_portal_session_expires_at = Some(None);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(Some(message.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error_message = Some(None);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    /// Publish step progress (0.0-1.0) with a human-readable status line
    pub fn progress(mut self, progress: f32, status: impl Into<String>) -> Self {
        self.connection_progress = Some(progress);
        self.connection_status = Some(status.into());
        self
    }

    pub fn touch_session(mut self, id: impl Into<String>) -> Self {
        self.touch_sessions.push(id.into());
        self
    }

    pub fn remove_session(mut self, id: impl Into<String>) -> Self {
        self.remove_sessions.push(id.into());
        self
    }

    /// Merge into `state` and re-establish the invariants
    pub(crate) fn apply(self, state: &mut SystemState, now: u64) {
        if let Some(s) = self.connection_state {
            state.connection_state = s;
        }
        if let Some(info) = self.network_info {
            state.network_info = info;
        }
        if let Some(v) = self.tunnel_url {
            state.tunnel_url = v;
        }
        if let Some(v) = self.tunnel_provider {
            state.tunnel_provider = v;
        }
        if let Some(v) = self.ap_password {
            state.ap_password = v;
        }
        if let Some(v) = self.ap_password_generated_at {
            state.ap_password_generated_at = v;
        }
        if let Some(v) = self.captive_portal_url {
            state.captive_portal_url = v;
        }
        if let Some(v) = self.captive_portal_detected_at {
            state.captive_portal_detected_at = v;
        }
        if let Some(v) = self.captive_portal_session_expires_at {
            state.captive_portal_session_expires_at = v;
        }
        if let Some(v) = self.error_message {
            state.error_message = v;
        }
        if let Some(v) = self.retry_count {
            state.retry_count = v;
        }
        if let Some(v) = self.connection_progress {
            state.connection_progress = v;
        }
        if let Some(v) = self.connection_status {
            state.connection_status = v;
        }

        for id in self.touch_sessions {
            state
                .sessions
                .entry(id)
                .and_modify(|s| s.last_seen = now)
                .or_insert(SessionInfo {
                    created_at: now,
                    last_seen: now,
                });
        }
        for id in &self.remove_sessions {
            state.sessions.remove(id);
        }

        normalize(state);
    }
}

/// Enforce the cross-field invariants of [`SystemState`]
pub(crate) fn normalize(state: &mut SystemState) {
    if !state.is_connected() {
        if state.tunnel_url.is_some() || state.tunnel_provider.is_some() {
            tracing::debug!(
                "Clearing tunnel fields in state {}",
                state.connection_state
            );
        }
        state.tunnel_url = None;
        state.tunnel_provider = None;
        state.captive_portal_url = None;
        state.captive_portal_detected_at = None;
        state.captive_portal_session_expires_at = None;
    }

    if matches!(
        state.connection_state,
        ConnectionState::ApMode | ConnectionState::Disconnected | ConnectionState::Failed
    ) {
        state.network_info = NetworkInfo::default();
    }

    state.connection_progress = if state.connection_progress.is_nan() {
        0.0
    } else {
        state.connection_progress.clamp(0.0, 1.0)
    };
}

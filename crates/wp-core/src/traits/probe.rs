//! Connectivity probe traits

use async_trait::async_trait;

/// Outcome of captive-portal detection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalVerdict {
    /// A portal intercepted the probe; `url` is where the user must log in
    Portal { url: String },
    /// A probe endpoint answered with its expected response
    Clear,
    /// Every probe timed out or failed to connect
    Inconclusive,
}

/// Independent checks of internet access, distinct from radio link status
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Probe the well-known connectivity-check endpoints without following redirects
    async fn detect_portal(&self) -> PortalVerdict;

    /// Whether at least one internet host is reachable
    async fn check_reachability(&self) -> bool;
}

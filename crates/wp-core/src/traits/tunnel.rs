//! Reverse tunnel provider traits

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

/// Tunnel provider backed by a long-running system service.
///
/// The supervisor never spawns anything for a primary provider; it only
/// asks the service manager whether the service is up.
#[async_trait]
pub trait PrimaryProvider: Send + Sync {
    /// Provider name published as `tunnel_provider`
    fn name(&self) -> &str;

    /// Whether the backing service is active
    async fn is_active(&self) -> bool;

    /// Public URL served while the service is active
    fn public_url(&self) -> String;
}

/// Tunnel provider run as a child process that prints its URL on stdout
pub trait SecondaryProvider: Send + Sync {
    /// Provider name published as `tunnel_provider`
    fn name(&self) -> &str;

    /// Command that exposes `local_port`, optionally authenticated
    fn command(&self, local_port: u16, auth: Option<&str>) -> Command;

    /// Patterns that match the public URL in the child's output
    fn url_patterns(&self) -> &[Regex];

    /// Respawn interval that keeps ahead of provider-side URL expiry
    fn refresh_interval(&self) -> Option<Duration> {
        None
    }

    /// Extract the public URL from one line of output
    fn match_url(&self, line: &str) -> Option<String> {
        self.url_patterns()
            .iter()
            .find_map(|re| re.find(line).map(|m| m.as_str().to_string()))
    }
}

//! Primary provider backed by a systemd service

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use wp_core::config::PrimaryTunnelConfig;
use wp_core::traits::PrimaryProvider;

/// Timeout for one `systemctl` query
const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Primary provider whose health is `systemctl is-active <service>`
pub struct SystemdPrimary {
    name: String,
    service: String,
    public_url: String,
}

impl SystemdPrimary {
    pub fn from_config(config: &PrimaryTunnelConfig) -> Self {
        Self {
            name: config.name.clone(),
            service: config.service.clone(),
            public_url: config.public_url.clone(),
        }
    }
}

#[async_trait]
impl PrimaryProvider for SystemdPrimary {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_active(&self) -> bool {
        let query = Command::new("systemctl")
            .args(["is-active", "--quiet", &self.service])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(QUERY_TIMEOUT, query).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!("systemctl query for {} failed: {}", self.service, e);
                false
            }
            Err(_) => {
                tracing::warn!("systemctl query for {} timed out", self.service);
                false
            }
        }
    }

    fn public_url(&self) -> String {
        self.public_url.clone()
    }
}

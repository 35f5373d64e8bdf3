//! Captive portal detection and reachability checks
//!
//! Probes the well-known connectivity-check endpoints in order without
//! following redirects. The first endpoint that answers decisively wins;
//! when none does, the verdict is inconclusive and the caller falls back to
//! a plain TCP reachability check.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use wp_core::config::{ProbeConfig, ProbeEndpoint};
use wp_core::traits::{NetworkProbe, PortalVerdict};

/// Outcome of one probe response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Portal(String),
    Clear,
    /// Not decisive; try the next endpoint
    Next,
}

/// Interpret one HTTP response from a probe endpoint
pub fn classify_probe_response(
    endpoint: &ProbeEndpoint,
    status: u16,
    location: Option<&str>,
    body: &str,
) -> ProbeOutcome {
    match status {
        302 | 307 | 308 => ProbeOutcome::Portal(
            location
                .filter(|l| !l.is_empty())
                .unwrap_or(&endpoint.url)
                .to_string(),
        ),
        511 => ProbeOutcome::Portal(endpoint.url.clone()),
        204 => ProbeOutcome::Clear,
        200 => match &endpoint.expected_body {
            Some(token) if body.contains(token.as_str()) => ProbeOutcome::Clear,
            Some(_) => ProbeOutcome::Portal(endpoint.url.clone()),
            // An endpoint that should answer 204 returned a page
            None if endpoint.expected_status == 204 || !body.trim().is_empty() => {
                ProbeOutcome::Portal(endpoint.url.clone())
            }
            None => ProbeOutcome::Clear,
        },
        _ => ProbeOutcome::Next,
    }
}

/// HTTP/TCP implementation of [`NetworkProbe`]
pub struct HttpProbe {
    client: reqwest::Client,
    endpoints: Vec<ProbeEndpoint>,
    reachability_hosts: Vec<String>,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(config: &ProbeConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("wifi-provisioner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoints: config.endpoints.clone(),
            reachability_hosts: config.reachability_hosts.clone(),
            timeout: config.timeout,
        })
    }

    async fn probe(&self, endpoint: &ProbeEndpoint) -> Option<ProbeOutcome> {
        let response = match self.client.get(&endpoint.url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", endpoint.url, e);
                return None;
            }
        };

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = if status == 200 {
            response.text().await.unwrap_or_default()
        } else {
            String::new()
        };

        let outcome = classify_probe_response(endpoint, status, location.as_deref(), &body);
        tracing::debug!("Probe {} -> {} ({:?})", endpoint.url, status, outcome);
        Some(outcome)
    }
}

#[async_trait]
impl NetworkProbe for HttpProbe {
    async fn detect_portal(&self) -> PortalVerdict {
        for endpoint in &self.endpoints {
            match self.probe(endpoint).await {
                Some(ProbeOutcome::Portal(url)) => {
                    tracing::info!("Captive portal detected via {}: {}", endpoint.url, url);
                    return PortalVerdict::Portal { url };
                }
                Some(ProbeOutcome::Clear) => return PortalVerdict::Clear,
                Some(ProbeOutcome::Next) | None => continue,
            }
        }
        tracing::debug!("Captive portal detection inconclusive");
        PortalVerdict::Inconclusive
    }

    async fn check_reachability(&self) -> bool {
        for host in &self.reachability_hosts {
            match tokio::time::timeout(self.timeout, TcpStream::connect(host.as_str())).await {
                Ok(Ok(_)) => return true,
                Ok(Err(e)) => tracing::debug!("Reachability check {} failed: {}", host, e),
                Err(_) => tracing::debug!("Reachability check {} timed out", host),
            }
        }
        false
    }
}

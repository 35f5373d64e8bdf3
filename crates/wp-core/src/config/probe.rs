//! Connectivity probe configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::duration_secs;

/// A connectivity-check endpoint and the response it gives on an open network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEndpoint {
    pub url: String,
    /// Status returned when no portal intercepts the request
    pub expected_status: u16,
    /// Token the body must contain on a 200 response
    pub expected_body: Option<String>,
}

impl ProbeEndpoint {
    pub fn new(url: impl Into<String>, expected_status: u16, expected_body: Option<&str>) -> Self {
        Self {
            url: url.into(),
            expected_status,
            expected_body: expected_body.map(str::to_string),
        }
    }
}

/// Captive portal and reachability probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Endpoints probed in order
    pub endpoints: Vec<ProbeEndpoint>,

    /// Hosts (`host:port`) used for the TCP reachability check
    pub reachability_hosts: Vec<String>,

    /// Timeout per probe
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![
                ProbeEndpoint::new("http://connectivitycheck.gstatic.com/generate_204", 204, None),
                ProbeEndpoint::new(
                    "http://captive.apple.com/hotspot-detect.html",
                    200,
                    Some("Success"),
                ),
                ProbeEndpoint::new(
                    "http://detectportal.firefox.com/success.txt",
                    200,
                    Some("success"),
                ),
            ],
            reachability_hosts: vec!["1.1.1.1:53".to_string(), "8.8.8.8:53".to_string()],
            timeout: Duration::from_secs(5),
        }
    }
}

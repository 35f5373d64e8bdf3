//! Captive portal probe integration tests
//!
//! Runs the HTTP probe against wiremock servers standing in for the
//! connectivity-check endpoints.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use wp_core::config::{ProbeConfig, ProbeEndpoint, ProvisionerConfig};
use wp_core::traits::{NetworkProbe, PortalVerdict};
use wp_core::ConnectionState;
use wp_orchestrator::connection::HttpProbe;
use wp_orchestrator::{ConnectionOrchestrator, StateStore};
use wp_radio::FakeRadio;

fn probe_config(server: &MockServer) -> ProbeConfig {
    ProbeConfig {
        endpoints: vec![
            ProbeEndpoint::new(format!("{}/generate_204", server.uri()), 204, None),
            ProbeEndpoint::new(
                format!("{}/hotspot-detect.html", server.uri()),
                200,
                Some("Success"),
            ),
        ],
        reachability_hosts: Vec::new(),
        timeout: Duration::from_secs(2),
    }
}

async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_redirect_reports_portal_location() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/generate_204",
        ResponseTemplate::new(302).insert_header("Location", "http://10.0.0.1/login"),
    )
    .await;

    let probe = HttpProbe::new(&probe_config(&server)).unwrap();
    assert_eq!(
        probe.detect_portal().await,
        PortalVerdict::Portal {
            url: "http://10.0.0.1/login".to_string()
        }
    );
}

#[tokio::test]
async fn test_no_content_is_clear() {
    let server = MockServer::start().await;
    mount(&server, "/generate_204", ResponseTemplate::new(204)).await;

    let probe = HttpProbe::new(&probe_config(&server)).unwrap();
    assert_eq!(probe.detect_portal().await, PortalVerdict::Clear);
}

#[tokio::test]
async fn test_server_error_falls_through_to_next_endpoint() {
    let server = MockServer::start().await;
    mount(&server, "/generate_204", ResponseTemplate::new(503)).await;
    mount(
        &server,
        "/hotspot-detect.html",
        ResponseTemplate::new(200).set_body_string("<HTML><BODY>Success</BODY></HTML>"),
    )
    .await;

    let probe = HttpProbe::new(&probe_config(&server)).unwrap();
    assert_eq!(probe.detect_portal().await, PortalVerdict::Clear);
}

#[tokio::test]
async fn test_login_page_instead_of_token_is_portal() {
    let server = MockServer::start().await;
    mount(&server, "/generate_204", ResponseTemplate::new(500)).await;
    mount(
        &server,
        "/hotspot-detect.html",
        ResponseTemplate::new(200).set_body_string("<html>Please sign in</html>"),
    )
    .await;

    let config = probe_config(&server);
    let probe = HttpProbe::new(&config).unwrap();
    assert_eq!(
        probe.detect_portal().await,
        PortalVerdict::Portal {
            url: config.endpoints[1].url.clone()
        }
    );
}

#[tokio::test]
async fn test_unanswered_probes_are_inconclusive() {
    // Nothing mounted: every endpoint answers 404
    let server = MockServer::start().await;
    let probe = HttpProbe::new(&probe_config(&server)).unwrap();
    assert_eq!(probe.detect_portal().await, PortalVerdict::Inconclusive);
}

#[tokio::test]
async fn test_reachability_uses_tcp_hosts() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open = listener.local_addr().unwrap().to_string();

    let closed = {
        let spare = TcpListener::bind("127.0.0.1:0").await.unwrap();
        spare.local_addr().unwrap().to_string()
    };

    let config = ProbeConfig {
        reachability_hosts: vec![closed.clone(), open],
        timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    };
    assert!(HttpProbe::new(&config).unwrap().check_reachability().await);

    let config = ProbeConfig {
        reachability_hosts: vec![closed],
        timeout: Duration::from_secs(2),
        ..ProbeConfig::default()
    };
    assert!(!HttpProbe::new(&config).unwrap().check_reachability().await);
}

#[tokio::test]
async fn test_connect_behind_portal_then_login() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/generate_204",
        ResponseTemplate::new(302).insert_header("Location", "http://10.0.0.1/login"),
    )
    .await;

    let mut config = ProvisionerConfig::default();
    config.state_file = None;
    config.connection.settle_time = Duration::from_millis(10);
    config.probe = probe_config(&server);
    config.recovery.portal_session_ttl = Duration::from_secs(600);

    let radio = Arc::new(FakeRadio::new());
    radio.add_network("Hotel Guest", None, 55);
    let orchestrator = ConnectionOrchestrator::new(
        radio.clone(),
        Arc::new(StateStore::in_memory()),
        Arc::new(HttpProbe::new(&config.probe).unwrap()),
        &config,
    );

    let state = orchestrator.connect("Hotel Guest", None).await.unwrap();
    assert_eq!(state.connection_state, ConnectionState::Connected);
    assert_eq!(state.captive_portal_url.as_deref(), Some("http://10.0.0.1/login"));
    let detected = state.captive_portal_detected_at.unwrap();
    assert_eq!(
        state.captive_portal_session_expires_at,
        Some(detected + 600_000)
    );
    assert!(state.behind_captive_portal());

    // The user signs in through the portal
    server.reset().await;
    mount(&server, "/generate_204", ResponseTemplate::new(204)).await;

    let state = orchestrator.recheck_portal().await;
    assert_eq!(state.connection_state, ConnectionState::Connected);
    assert!(state.captive_portal_url.is_none());
    assert!(state.captive_portal_session_expires_at.is_none());
}

//! NetworkManager event stream
//!
//! Runs `nmcli monitor` and classifies its lines into [`RadioEvent`]s. The
//! monitor is restarted if it exits, until the receiving side is dropped.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use wp_core::traits::{RadioEvent, RADIO_EVENT_CHANNEL_CAPACITY};

/// Delay before restarting an exited monitor process
const MONITOR_RESTART_DELAY: Duration = Duration::from_secs(2);

/// Classify one line of `nmcli monitor` output.
///
/// `interface` distinguishes device lines (`wlan0: disconnected`) from
/// connection lines (`Home Wifi: deactivated`).
pub fn classify_monitor_line(line: &str, interface: &str) -> Option<RadioEvent> {
    let line = line.trim();
    let lower = line.to_lowercase();

    if let Some(rest) = lower.strip_prefix("connectivity is now ") {
        let level = rest.trim_matches(|c| c == '\'' || c == '"');
        return match level {
            "none" => Some(RadioEvent::ConnectivityLost),
            "limited" | "portal" => Some(RadioEvent::ConnectivityDegraded),
            "full" => Some(RadioEvent::ConnectivityRestored),
            _ => None,
        };
    }

    let (subject, status) = line.rsplit_once(": ")?;
    let subject = subject.trim_matches(|c| c == '\'' || c == '"');
    let status = status.trim().to_lowercase();

    if subject == interface {
        return match status.as_str() {
            "disconnected" => Some(RadioEvent::DeviceDisconnected),
            "unavailable" => Some(RadioEvent::DeviceUnavailable),
            _ => None,
        };
    }

    if status == "deactivated" || status == "connection deactivated" {
        return Some(RadioEvent::ConnectionDeactivated {
            name: subject.to_string(),
        });
    }
    None
}

/// Spawn the monitor task and return the event receiver
pub fn spawn_monitor(nmcli: PathBuf, interface: String) -> mpsc::Receiver<RadioEvent> {
    let (tx, rx) = mpsc::channel(RADIO_EVENT_CHANNEL_CAPACITY);

    tokio::spawn(async move {
        while !tx.is_closed() {
            if let Err(e) = run_monitor_once(&nmcli, &interface, &tx).await {
                tracing::warn!("Radio monitor failed: {}", e);
            }
            if tx.is_closed() {
                break;
            }
            tracing::info!("Radio monitor exited, restarting in {:?}", MONITOR_RESTART_DELAY);
            tokio::time::sleep(MONITOR_RESTART_DELAY).await;
        }
        tracing::debug!("Radio monitor task exiting");
    });

    rx
}

async fn run_monitor_once(
    nmcli: &PathBuf,
    interface: &str,
    tx: &mpsc::Sender<RadioEvent>,
) -> std::io::Result<()> {
    let mut child = Command::new(nmcli)
        .arg("monitor")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    let Some(stdout) = child.stdout.take() else {
        return Ok(());
    };
    let mut lines = BufReader::new(stdout).lines();

    while let Some(line) = lines.next_line().await? {
        tracing::trace!("nmcli monitor: {}", line);
        if let Some(event) = classify_monitor_line(&line, interface) {
            tracing::debug!("Radio event: {:?}", event);
            if tx.send(event).await.is_err() {
                break;
            }
        }
    }
    Ok(())
}

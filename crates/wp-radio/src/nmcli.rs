//! NetworkManager driver
//!
//! Every verb is one `nmcli` invocation with a timeout. Arguments are passed
//! as argv (never through a shell); credentials are validated by the caller
//! before they reach this module.

use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{mpsc, OnceCell};

use wp_core::config::RadioConfig;
use wp_core::traits::{ApProfile, Network, ProfileInspection, RadioDriver, RadioEvent, RadioStatus};
use wp_core::DriverError;

use crate::monitor;
use crate::parse;

/// Radio driver backed by `nmcli`
pub struct NmcliDriver {
    nmcli: PathBuf,
    profile_dir: PathBuf,
    timeout: Duration,
    /// Configured or detected wireless interface
    interface: OnceCell<String>,
}

impl NmcliDriver {
    /// Create a driver from configuration
    pub fn new(config: &RadioConfig) -> Self {
        let interface = OnceCell::new();
        if let Some(iface) = &config.interface {
            // A fresh cell cannot already be initialized
            let _ = interface.set(iface.clone());
        }
        Self {
            nmcli: config.nmcli_path.clone(),
            profile_dir: config.profile_dir.clone(),
            timeout: config.command_timeout,
            interface,
        }
    }

    async fn interface(&self) -> Result<&str, DriverError> {
        self.interface
            .get_or_try_init(|| self.detect_device())
            .await
            .map(String::as_str)
    }

    /// Run nmcli and return stdout, mapping failures to [`DriverError`]
    async fn run(&self, verb: &'static str, args: &[&str]) -> Result<String, DriverError> {
        tracing::debug!("nmcli {}: {:?}", verb, redact(args));

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.nmcli)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| DriverError::Timeout {
            verb,
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| DriverError::Spawn {
            program: self.nmcli.display().to_string(),
            message: e.to_string(),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            let message = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(DriverError::Command { verb, message });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.profile_dir.join(format!("{}.nmconnection", name))
    }
}

/// Hide secrets from debug logs
fn redact(args: &[&str]) -> Vec<String> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("<redacted>".to_string());
            hide_next = false;
            continue;
        }
        hide_next = matches!(*arg, "password" | "wifi-sec.psk");
        redacted.push((*arg).to_string());
    }
    redacted
}

#[async_trait]
impl RadioDriver for NmcliDriver {
    async fn detect_device(&self) -> Result<String, DriverError> {
        let output = self
            .run("detect_device", &["-t", "-f", "DEVICE,TYPE", "device"])
            .await?;
        let device = parse::parse_wifi_device(&output).ok_or(DriverError::NoDevice)?;
        tracing::info!("Detected wireless device {}", device);
        Ok(device)
    }

    async fn scan(&self) -> Result<Vec<Network>, DriverError> {
        let iface = self.interface().await?;
        let output = self
            .run(
                "scan",
                &[
                    "-t", "-f", "IN-USE,SSID,SIGNAL,SECURITY", "device", "wifi", "list",
                    "ifname", iface, "--rescan", "yes",
                ],
            )
            .await?;
        Ok(parse::parse_scan(&output))
    }

    async fn create_ap_profile(&self, profile: &ApProfile) -> Result<(), DriverError> {
        let iface = self.interface().await?;

        if self.profile_exists(&profile.name).await? {
            self.delete_profile(&profile.name).await?;
        }

        let channel = profile.channel.to_string();
        self.run(
            "create_ap_profile",
            &[
                "connection", "add",
                "type", "wifi",
                "ifname", iface,
                "con-name", &profile.name,
                "autoconnect", "no",
                "ssid", &profile.ssid,
                "802-11-wireless.mode", "ap",
                "802-11-wireless.band", "bg",
                "802-11-wireless.channel", &channel,
                "ipv4.method", "shared",
                "ipv4.addresses", &profile.ip,
                "wifi-sec.key-mgmt", "wpa-psk",
                "wifi-sec.psk", &profile.password,
            ],
        )
        .await?;
        Ok(())
    }

    async fn activate(&self, profile: &str) -> Result<(), DriverError> {
        self.run("activate", &["connection", "up", "id", profile])
            .await
            .map(|_| ())
    }

    async fn deactivate(&self, profile: &str) -> Result<(), DriverError> {
        self.run("deactivate", &["connection", "down", "id", profile])
            .await
            .map(|_| ())
    }

    async fn connect_profile(&self, ssid: &str, password: Option<&str>) -> Result<(), DriverError> {
        let iface = self.interface().await?;
        let mut args = vec!["device", "wifi", "connect", ssid];
        if let Some(password) = password {
            args.extend(["password", password]);
        }
        args.extend(["ifname", iface, "name", ssid]);
        self.run("connect_profile", &args).await.map(|_| ())
    }

    async fn get_status(&self) -> Result<RadioStatus, DriverError> {
        let iface = self.interface().await?;
        let show = self
            .run(
                "get_status",
                &[
                    "-t", "-f", "GENERAL.STATE,GENERAL.CONNECTION,IP4.ADDRESS", "device",
                    "show", iface,
                ],
            )
            .await?;
        let show = parse::parse_device_show(&show);

        let wifi = self
            .run(
                "get_status",
                &["-t", "-f", "ACTIVE,SSID", "device", "wifi", "list", "ifname", iface, "--rescan", "no"],
            )
            .await?;

        Ok(RadioStatus {
            ssid: parse::parse_active_ssid(&wifi),
            ip: show.ip,
            device_state: show.state,
            active_profile: show.connection,
        })
    }

    async fn delete_profile(&self, name: &str) -> Result<(), DriverError> {
        self.run("delete_profile", &["connection", "delete", "id", name])
            .await
            .map(|_| ())
    }

    async fn profile_exists(&self, name: &str) -> Result<bool, DriverError> {
        let output = self
            .run("profile_exists", &["-t", "-f", "NAME", "connection", "show"])
            .await?;
        Ok(parse::parse_profile_names(&output).iter().any(|n| n == name))
    }

    async fn inspect_profile(&self, name: &str) -> Result<Option<ProfileInspection>, DriverError> {
        let path = self.profile_path(name);
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DriverError::Command {
                    verb: "inspect_profile",
                    message: format!("{}: {}", path.display(), e),
                })
            }
        };
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| DriverError::Command {
                verb: "inspect_profile",
                message: format!("{}: {}", path.display(), e),
            })?;

        Ok(Some(ProfileInspection {
            owner_uid: metadata.uid(),
            mode: metadata.mode() & 0o7777,
            contents,
        }))
    }

    async fn event_stream(&self) -> Result<mpsc::Receiver<RadioEvent>, DriverError> {
        let iface = self.interface().await?.to_string();
        Ok(monitor::spawn_monitor(self.nmcli.clone(), iface))
    }
}

//! Parsers for `nmcli --terse` output
//!
//! Terse output separates fields with `:` and escapes literal colons and
//! backslashes inside values as `\:` and `\\`.

use wp_core::traits::{DeviceState, Network};

/// Split one terse line into fields, undoing nmcli's escaping
pub fn split_terse(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ':' => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Parse `nmcli -t -f IN-USE,SSID,SIGNAL,SECURITY device wifi list`.
///
/// Hidden networks (empty SSID) are skipped. Duplicate SSIDs (several access
/// points of one network) keep the strongest signal.
pub fn parse_scan(output: &str) -> Vec<Network> {
    let mut networks: Vec<Network> = Vec::new();

    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields = split_terse(line);
        if fields.len() < 4 {
            tracing::debug!("Skipping malformed scan line: {:?}", line);
            continue;
        }
        let ssid = fields[1].clone();
        if ssid.is_empty() {
            continue;
        }
        let network = Network {
            ssid,
            signal: fields[2].trim().parse().unwrap_or(0),
            security: fields[3].trim().to_string(),
            in_use: fields[0].trim() == "*",
        };

        match networks.iter_mut().find(|n| n.ssid == network.ssid) {
            Some(existing) => {
                existing.in_use |= network.in_use;
                if network.signal > existing.signal {
                    existing.signal = network.signal;
                    existing.security = network.security;
                }
            }
            None => networks.push(network),
        }
    }

    networks.sort_by(|a, b| b.signal.cmp(&a.signal));
    networks
}

/// Find the first wifi device in `nmcli -t -f DEVICE,TYPE device`
pub fn parse_wifi_device(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [device, kind, ..] if kind == "wifi" => Some(device.clone()),
            _ => None,
        }
    })
}

/// Fields of interest from `nmcli -t -f GENERAL.STATE,GENERAL.CONNECTION,IP4.ADDRESS device show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceShow {
    pub state: DeviceState,
    pub connection: Option<String>,
    pub ip: Option<String>,
}

/// Parse `device show` output
pub fn parse_device_show(output: &str) -> DeviceShow {
    let mut show = DeviceShow {
        state: DeviceState::Unknown(String::new()),
        connection: None,
        ip: None,
    };

    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "GENERAL.STATE" => show.state = parse_device_state(value),
            "GENERAL.CONNECTION" if !value.is_empty() && value != "--" => {
                show.connection = Some(value.replace("\\:", ":"));
            }
            k if k.starts_with("IP4.ADDRESS") && show.ip.is_none() && !value.is_empty() => {
                // Strip the prefix length
                let ip = value.split('/').next().unwrap_or(value);
                show.ip = Some(ip.to_string());
            }
            _ => {}
        }
    }
    show
}

/// Map `GENERAL.STATE` (e.g. `100 (connected)`) to a [`DeviceState`]
pub fn parse_device_state(value: &str) -> DeviceState {
    let code = value
        .split_whitespace()
        .next()
        .and_then(|c| c.parse::<u32>().ok());
    match code {
        Some(100) => DeviceState::Connected,
        Some(40..=90) => DeviceState::Connecting,
        Some(30) => DeviceState::Disconnected,
        Some(20) => DeviceState::Unavailable,
        Some(10) => DeviceState::Unmanaged,
        _ => DeviceState::Unknown(value.to_string()),
    }
}

/// Parse the active SSID from `nmcli -t -f ACTIVE,SSID device wifi list`
pub fn parse_active_ssid(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let fields = split_terse(line);
        match fields.as_slice() {
            [active, ssid, ..] if active == "yes" && !ssid.is_empty() => Some(ssid.clone()),
            _ => None,
        }
    })
}

/// Parse profile names from `nmcli -t -f NAME connection show`
pub fn parse_profile_names(output: &str) -> Vec<String> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| split_terse(l).remove(0))
        .collect()
}

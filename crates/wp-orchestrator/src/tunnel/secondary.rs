//! Secondary provider spawned from a command template

use std::time::Duration;

use regex::Regex;
use tokio::process::Command;

use wp_core::config::SecondaryTunnelConfig;
use wp_core::error::ConfigError;
use wp_core::traits::SecondaryProvider;

/// Runs `program args...`, substituting `{port}` and `{auth}`
pub struct CommandProvider {
    name: String,
    program: String,
    args: Vec<String>,
    auth_args: Vec<String>,
    patterns: Vec<Regex>,
    refresh_interval: Duration,
}

impl CommandProvider {
    pub fn from_config(config: &SecondaryTunnelConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            name: config.name.clone(),
            program: config.program.clone(),
            args: config.args.clone(),
            auth_args: config.auth_args.clone(),
            patterns: config.compile_patterns()?,
            refresh_interval: config.refresh_interval,
        })
    }

    /// Expanded argv for `local_port` and optional credentials
    pub fn argv(&self, local_port: u16, auth: Option<&str>) -> Vec<String> {
        let port = local_port.to_string();
        let mut argv: Vec<String> = Vec::with_capacity(self.args.len() + self.auth_args.len());

        // Authentication options go before the positional destination
        if let Some(auth) = auth {
            argv.extend(self.auth_args.iter().map(|a| a.replace("{auth}", auth)));
        }
        argv.extend(self.args.iter().map(|a| a.replace("{port}", &port)));
        argv
    }
}

impl SecondaryProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn command(&self, local_port: u16, auth: Option<&str>) -> Command {
        let mut command = Command::new(&self.program);
        command.args(self.argv(local_port, auth));
        command
    }

    fn url_patterns(&self) -> &[Regex] {
        &self.patterns
    }

    fn refresh_interval(&self) -> Option<Duration> {
        Some(self.refresh_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_argv() {
        let provider = CommandProvider::from_config(&SecondaryTunnelConfig::default()).unwrap();
        let argv = provider.argv(8080, None);
        assert!(argv.contains(&"80:localhost:8080".to_string()));
        assert_eq!(argv.last().map(String::as_str), Some("nokey@localhost.run"));
    }

    #[test]
    fn test_auth_args_substituted() {
        let config = SecondaryTunnelConfig {
            auth_args: vec!["-i".to_string(), "{auth}".to_string()],
            ..SecondaryTunnelConfig::default()
        };
        let provider = CommandProvider::from_config(&config).unwrap();

        let argv = provider.argv(80, Some("/etc/wp/tunnel_key"));
        assert_eq!(&argv[..2], &["-i".to_string(), "/etc/wp/tunnel_key".to_string()]);
        assert!(!provider.argv(80, None).contains(&"-i".to_string()));
    }

    #[test]
    fn test_matches_default_urls() {
        let provider = CommandProvider::from_config(&SecondaryTunnelConfig::default()).unwrap();
        assert_eq!(
            provider
                .match_url("abc123.lhr.life tunneled with tls termination, https://abc123.lhr.life")
                .as_deref(),
            Some("https://abc123.lhr.life")
        );
        assert_eq!(provider.match_url("Welcome to localhost.run!"), None);
    }
}

//! Configuration for the standalone mock server.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
    /// Bind host shared by every service mock.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Graceful shutdown deadline per service mock, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Service name -> port (0 picks an ephemeral port).
    pub services: BTreeMap<String, u16>,

    /// Definition tree per service, in the loader's format.
    #[serde(default)]
    pub mocks: serde_json::Map<String, serde_json::Value>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, anyhow::Error> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, anyhow::Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.services.is_empty() {
            anyhow::bail!("At least one service must be declared under 'services'");
        }

        for name in self.mocks.keys() {
            if !self.services.contains_key(name) {
                anyhow::bail!(
                    "Mock definition for '{}' has no matching entry under 'services'",
                    name
                );
            }
        }

        Ok(())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Listen address for each declared service.
    pub fn listen_addrs(&self) -> impl Iterator<Item = (&str, SocketAddr)> + '_ {
        self.services
            .iter()
            .map(|(name, port)| (name.as_str(), SocketAddr::new(self.host, *port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = Config::from_yaml("services:\n  payments: 0\n").unwrap();
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
        assert!(config.mocks.is_empty());
        let addrs: Vec<_> = config.listen_addrs().collect();
        assert_eq!(addrs, vec![("payments", "127.0.0.1:0".parse::<SocketAddr>().unwrap())]);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_yaml(
            r#"
host: 0.0.0.0
shutdownTimeoutMs: 250
services:
  payments: 18081
  users: 18082
mocks:
  payments:
    strategy: constant
    body: '{"ok": true}'
"#,
        )
        .unwrap();
        assert_eq!(config.shutdown_timeout(), Duration::from_millis(250));
        assert_eq!(config.services["users"], 18082);
        assert_eq!(config.mocks["payments"]["strategy"], "constant");
    }

    #[test]
    fn test_validation_errors() {
        assert!(Config::from_yaml("services: {}\n").is_err());
        assert!(Config::from_yaml(
            "services:\n  payments: 0\nmocks:\n  users:\n    strategy: nop\n"
        )
        .is_err());
        assert!(Config::from_yaml("services:\n  payments: 0\nport: 1\n").is_err());
    }
}

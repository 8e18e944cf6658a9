//! Configuration handling for the hypha daemon.
//!
//! Reads the YAML config file, falls back to defaults when it is missing or
//! unreadable, then applies `HYPHA_*` environment overrides.

use anyhow::Result;
use mesh_node::NodeConfig;
use mesh_routing::{InterfaceConfig, InterfaceMode};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HyphaConfig {
    /// Node settings handed to the mesh core
    pub node: NodeConfig,
    /// UDP link settings
    pub udp: UdpConfig,
    /// File holding the node's secret key material; in-memory when unset
    pub identity_path: Option<PathBuf>,
}

/// UDP link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    /// Local bind address
    pub listen: SocketAddr,
    /// Neighbours that receive broadcasts
    pub peers: Vec<SocketAddr>,
    /// Mode of the UDP interface when none is configured
    pub mode: InterfaceMode,
    /// Treat the UDP segment as a shared broadcast medium
    pub shared_medium: bool,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 4242)),
            peers: Vec::new(),
            mode: InterfaceMode::Full,
            shared_medium: true,
        }
    }
}

impl HyphaConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let path = config_path.as_ref();
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => match serde_yaml::from_str::<HyphaConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", path);
                Self::default()
            }
        };

        config.apply_environment_overrides();
        config.node.validate()?;

        info!(
            "Final configuration: name={}, listen={}, peers={}, interfaces={}",
            config.node.name,
            config.udp.listen,
            config.udp.peers.len(),
            config.node.interfaces.len()
        );
        Ok(config)
    }

    /// The UDP interface, added when the file configures none
    pub fn udp_interface(&mut self) -> InterfaceConfig {
        if let Some(existing) = self.node.interfaces.first() {
            return existing.clone();
        }
        let mut interface = InterfaceConfig::new(0, "udp0", self.udp.mode).with_bandwidth(1_000_000);
        if self.udp.shared_medium {
            interface = interface.shared();
        }
        self.node.interfaces.push(interface.clone());
        interface
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(name) = var("HYPHA_NAME") {
            info!("Node name overridden by environment: {}", name);
            self.node.name = name;
        }

        if let Some(listen) = var("HYPHA_LISTEN") {
            match listen.parse::<SocketAddr>() {
                Ok(addr) => {
                    self.udp.listen = addr;
                    info!("Listen address overridden by environment: {}", addr);
                }
                Err(e) => warn!("Ignoring HYPHA_LISTEN={}: {}", listen, e),
            }
        }

        if let Some(peers) = var("HYPHA_PEERS") {
            let parsed: Result<Vec<SocketAddr>, _> = peers
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::parse)
                .collect();
            match parsed {
                Ok(list) => {
                    info!("Peers overridden by environment: {} peer(s)", list.len());
                    self.udp.peers = list;
                }
                Err(e) => warn!("Ignoring HYPHA_PEERS={}: {}", peers, e),
            }
        }

        if let Some(path) = var("HYPHA_IDENTITY_PATH") {
            info!("Identity path overridden by environment: {}", path);
            self.identity_path = Some(PathBuf::from(path));
        }

        if let Some(mode) = var("HYPHA_MODE") {
            match mode.parse::<InterfaceMode>() {
                Ok(m) => {
                    self.udp.mode = m;
                    info!("Interface mode overridden by environment: {}", mode);
                }
                Err(e) => warn!("Ignoring HYPHA_MODE={}: {}", mode, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = HyphaConfig::default();
        assert_eq!(config.node.name, "hypha");
        assert_eq!(config.udp.listen, "0.0.0.0:4242".parse::<SocketAddr>().unwrap());
        assert!(config.udp.peers.is_empty());
        assert!(config.identity_path.is_none());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
node:
  name: ridge
  profile: constrained
  max_hops: 8
  transfer:
    fragment_size: 150
udp:
  listen: 127.0.0.1:5000
  peers:
    - 127.0.0.1:5001
    - 127.0.0.1:5002
  mode: gateway
identity_path: /var/lib/hypha/identity
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let mut config = HyphaConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.node.name, "ridge");
        assert_eq!(config.node.max_hops, 8);
        assert_eq!(config.node.transfer.fragment_size, 150);
        assert_eq!(config.udp.peers.len(), 2);
        assert_eq!(
            config.identity_path.as_deref(),
            Some(Path::new("/var/lib/hypha/identity"))
        );

        let interface = config.udp_interface();
        assert_eq!(interface.mode, InterfaceMode::Gateway);
        assert!(interface.shared_medium);
        assert_eq!(config.node.interfaces.len(), 1);
        // second call reuses the added interface
        config.udp_interface();
        assert_eq!(config.node.interfaces.len(), 1);
    }

    #[test]
    fn test_missing_or_broken_file_uses_defaults() {
        let config = HyphaConfig::load_from_file("/nonexistent/hypha.yaml").unwrap();
        assert_eq!(config.node.name, "hypha");

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"node: [not, a, map").unwrap();
        let config = HyphaConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.udp.listen, "0.0.0.0:4242".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_invalid_node_config_rejected() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"node:\n  transfer:\n    fragment_size: 0\n")
            .unwrap();
        assert!(HyphaConfig::load_from_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("HYPHA_NAME", "valley"),
            ("HYPHA_LISTEN", "127.0.0.1:6000"),
            ("HYPHA_PEERS", "127.0.0.1:6001, 127.0.0.1:6002"),
            ("HYPHA_MODE", "roaming"),
            ("HYPHA_IDENTITY_PATH", "/tmp/id"),
        ]
        .into_iter()
        .collect();

        let mut config = HyphaConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.node.name, "valley");
        assert_eq!(config.udp.listen.port(), 6000);
        assert_eq!(config.udp.peers.len(), 2);
        assert_eq!(config.udp.mode, InterfaceMode::Roaming);
        assert_eq!(config.identity_path, Some(PathBuf::from("/tmp/id")));
    }

    #[test]
    fn test_bad_override_ignored() {
        let mut config = HyphaConfig::default();
        config.apply_overrides(|k| match k {
            "HYPHA_LISTEN" => Some("not-an-address".to_string()),
            "HYPHA_PEERS" => Some("127.0.0.1:1,bogus".to_string()),
            _ => None,
        });
        assert_eq!(config.udp.listen, "0.0.0.0:4242".parse::<SocketAddr>().unwrap());
        assert!(config.udp.peers.is_empty());
    }
}

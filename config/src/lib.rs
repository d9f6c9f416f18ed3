use std::{ops::RangeInclusive, path::PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_ROUTE_TABLE_START: u32 = 256;
pub const DEFAULT_NODE_PORT_MARK: u32 = 0x2000;
pub const DEFAULT_NODE_PORTS: &str = "30000:32767";

const RESERVED_TABLES: RangeInclusive<u32> = 253..=255;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to parse network configuration: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid nodePorts {0:?}: expected \"port\" or \"low:high\"")]
    InvalidNodePorts(String),

    #[error("invalid routeTableStart {0}: tables 253-255 are reserved")]
    ReservedTable(u32),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Network configuration handed to the plugin on stdin.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default = "default_cni_version")]
    pub cni_version: String,

    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub cni_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<Value>,

    #[serde(default)]
    pub ip_masq: bool,

    /// Uplink interface; empty means the interface of the default route.
    #[serde(default)]
    pub host_interface: String,

    /// 0 means inherit from the uplink.
    #[serde(default)]
    pub mtu: u32,

    #[serde(default)]
    pub route_table_start: u32,

    #[serde(default)]
    pub node_port_mark: u32,

    #[serde(default)]
    pub node_ports: String,

    #[serde(default)]
    pub log_level: LogLevel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

fn default_cni_version() -> String {
    "0.1.0".to_string()
}

impl NetConf {
    pub fn parse(bytes: &[u8]) -> Result<Self, ConfigError> {
        let mut conf: Self = serde_json::from_slice(bytes)?;
        conf.apply_defaults();
        conf.validate()?;
        Ok(conf)
    }

    // Zero values carry no meaning of their own and fall back to defaults.
    fn apply_defaults(&mut self) {
        if self.route_table_start == 0 {
            self.route_table_start = DEFAULT_ROUTE_TABLE_START;
        }

        if self.node_port_mark == 0 {
            self.node_port_mark = DEFAULT_NODE_PORT_MARK;
        }

        if self.node_ports.is_empty() {
            self.node_ports = DEFAULT_NODE_PORTS.to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if RESERVED_TABLES.contains(&self.route_table_start) {
            return Err(ConfigError::ReservedTable(self.route_table_start));
        }

        self.node_port_range()?;

        Ok(())
    }

    pub fn node_port_range(&self) -> Result<RangeInclusive<u16>, ConfigError> {
        let invalid = || ConfigError::InvalidNodePorts(self.node_ports.clone());
        let port = |s: &str| s.trim().parse::<u16>().map_err(|_| invalid());

        let (low, high) = match self.node_ports.split_once(':') {
            Some((low, high)) => (port(low)?, port(high)?),
            None => {
                let p = port(&self.node_ports)?;
                (p, p)
            }
        };

        if low > high {
            return Err(invalid());
        }

        Ok(low..=high)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_json_applies_defaults() {
        let json = r#"{"cniVersion":"0.3.1","name":"aws-cni","type":"ptproute","prevResult":{"ips":[]}}"#;
        let conf = NetConf::parse(json.as_bytes()).unwrap();

        assert_eq!("0.3.1", conf.cni_version);
        assert_eq!("aws-cni", conf.name);
        assert_eq!("ptproute", conf.cni_type);
        assert!(conf.prev_result.is_some());
        assert!(!conf.ip_masq);
        assert_eq!(conf.host_interface, "");
        assert_eq!(conf.mtu, 0);
        assert_eq!(conf.route_table_start, 256);
        assert_eq!(conf.node_port_mark, 0x2000);
        assert_eq!(conf.node_ports, "30000:32767");
        assert_eq!(conf.log_level, LogLevel::Warn);
        assert!(conf.log_dir.is_none());
        assert_eq!(conf.node_port_range().unwrap(), 30000..=32767);
    }

    #[test]
    fn config_explicit_values() {
        let json = r#"{
            "cniVersion":"1.0.0","name":"n","type":"ptproute",
            "ipMasq":true,"hostInterface":"eth1","mtu":9001,
            "routeTableStart":1000,"nodePortMark":128,"nodePorts":"8080",
            "logLevel":"debug","logDir":"/var/log/ptproute"
        }"#;
        let conf = NetConf::parse(json.as_bytes()).unwrap();

        assert!(conf.ip_masq);
        assert_eq!(conf.host_interface, "eth1");
        assert_eq!(conf.mtu, 9001);
        assert_eq!(conf.route_table_start, 1000);
        assert_eq!(conf.node_port_mark, 128);
        assert_eq!(conf.node_port_range().unwrap(), 8080..=8080);
        assert_eq!(LevelFilter::from(conf.log_level), LevelFilter::DEBUG);
        assert_eq!(conf.log_dir, Some(PathBuf::from("/var/log/ptproute")));
    }

    #[test]
    fn config_missing_version_is_legacy() {
        let conf = NetConf::parse(br#"{"name":"n","type":"ptproute"}"#).unwrap();
        assert_eq!(conf.cni_version, "0.1.0");
    }

    #[test]
    fn config_rejects_bad_node_ports() {
        for ports in ["32767:30000", "abc", "1:2:3", "70000"] {
            let json = format!(r#"{{"cniVersion":"0.4.0","nodePorts":"{ports}"}}"#);
            let err = NetConf::parse(json.as_bytes()).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidNodePorts(_)), "{ports}");
        }
    }

    #[test]
    fn config_rejects_reserved_table() {
        let err = NetConf::parse(br#"{"cniVersion":"0.4.0","routeTableStart":254}"#).unwrap_err();
        assert!(matches!(err, ConfigError::ReservedTable(254)));
    }

    #[test]
    fn config_rejects_malformed_json() {
        let err = NetConf::parse(b"{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Decode(_)));
    }
}

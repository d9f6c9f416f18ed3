use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    command::version::{is_legacy, SUPPORTED_VERSIONS},
    error::PluginError,
    interface::Interface,
    ip::IpConfig,
    route::Route,
};

const INTERFACE_INDEXED_VERSION: &str = "0.3.0";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Dns {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub domain: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Dns {
    fn is_empty(&self) -> bool {
        self == &Dns::default()
    }
}

/// Result of a plugin invocation in the current (0.3.0+) layout.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Interface>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ips: Vec<IpConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    pub dns: Dns,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct LegacyIpConfig {
    ip: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gateway: Option<std::net::IpAddr>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    routes: Vec<Route>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
struct LegacyResult {
    #[serde(default)]
    cni_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip4: Option<LegacyIpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ip6: Option<LegacyIpConfig>,
    #[serde(default, skip_serializing_if = "Dns::is_empty")]
    dns: Dns,
}

impl From<LegacyResult> for CniResult {
    fn from(legacy: LegacyResult) -> Self {
        let mut result = CniResult {
            cni_version: legacy.cni_version,
            dns: legacy.dns,
            ..Default::default()
        };

        for config in [legacy.ip4, legacy.ip6].into_iter().flatten() {
            result.ips.push(IpConfig::new(config.ip, config.gateway));
            result.routes.extend(config.routes);
        }

        result
    }
}

impl CniResult {
    pub fn parse(cni_version: &str, value: Value) -> Result<Self, PluginError> {
        if !SUPPORTED_VERSIONS.contains(&cni_version) {
            return Err(PluginError::IncompatibleVersion(cni_version.to_string()));
        }

        let mut result: CniResult = if is_legacy(cni_version) {
            serde_json::from_value::<LegacyResult>(value)?.into()
        } else {
            serde_json::from_value(value)?
        };

        result.cni_version = cni_version.to_string();
        Ok(result)
    }

    /// Addresses that belong to `if_name` inside the container.
    ///
    /// Only a 0.3.0 result is trusted to index host-side interfaces; for
    /// every other version all listed addresses are the container's.
    pub fn container_ips(&self, cni_version: &str, if_name: &str) -> Vec<IpConfig> {
        if cni_version != INTERFACE_INDEXED_VERSION {
            return self.ips.clone();
        }

        self.ips
            .iter()
            .filter(|ip| match ip.interface {
                None => false,
                Some(index) => usize::try_from(index)
                    .ok()
                    .and_then(|i| self.interfaces.get(i))
                    .map_or(true, |iface| iface.name == if_name),
            })
            .cloned()
            .collect()
    }

    pub fn to_value(&self, cni_version: &str) -> Result<Value, PluginError> {
        if is_legacy(cni_version) {
            return Ok(serde_json::to_value(self.to_legacy(cni_version))?);
        }

        let mut result = self.clone();
        result.cni_version = cni_version.to_string();

        let keep_version = cni_version != "1.0.0";
        for ip in result.ips.iter_mut() {
            ip.version = keep_version.then(|| crate::ip::family_version(&ip.address).to_owned());
        }

        Ok(serde_json::to_value(result)?)
    }

    fn to_legacy(&self, cni_version: &str) -> LegacyResult {
        let pick = |v4: bool| {
            self.ips
                .iter()
                .find(|ip| ip.is_v4() == v4)
                .map(|ip| LegacyIpConfig {
                    ip: ip.address,
                    gateway: ip.gateway,
                    routes: self
                        .routes
                        .iter()
                        .filter(|r| matches!(r.dst, IpNet::V4(_)) == v4)
                        .cloned()
                        .collect(),
                })
        };

        LegacyResult {
            cni_version: cni_version.to_string(),
            ip4: pick(true),
            ip6: pick(false),
            dns: self.dns.clone(),
        }
    }
}

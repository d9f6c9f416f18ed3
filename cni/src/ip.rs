use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IpConfig {
    /// "4" or "6"; dropped from 1.0.0 on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub address: IpNet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
    /// Index into the result's interfaces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<i32>,
}

impl IpConfig {
    pub fn new(address: IpNet, gateway: Option<IpAddr>) -> Self {
        Self {
            version: Some(family_version(&address).to_owned()),
            address,
            gateway,
            interface: None,
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self.address, IpNet::V4(_))
    }

    /// The address alone as a /32 or /128.
    pub fn host_net(&self) -> IpNet {
        IpNet::from(self.address.addr())
    }
}

pub fn family_version(net: &IpNet) -> &'static str {
    match net {
        IpNet::V4(_) => "4",
        IpNet::V6(_) => "6",
    }
}

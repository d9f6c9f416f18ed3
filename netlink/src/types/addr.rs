use std::net::IpAddr;

use anyhow::Result;
use derive_builder::Builder;
use ipnet::IpNet;

use super::{
    message::{AddressMessage, Attribute, RouteAttrs},
    vec_to_addr,
};

pub enum AddrCmd {
    Add,
    Delete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddrFamily {
    All = 0,
    V4 = 2,
    V6 = 10,
}

impl From<AddrFamily> for i32 {
    fn from(val: AddrFamily) -> Self {
        val as i32
    }
}

impl From<u16> for AddrFamily {
    fn from(val: u16) -> Self {
        match val {
            2 => Self::V4,
            10 => Self::V6,
            _ => Self::All,
        }
    }
}

impl From<&IpAddr> for AddrFamily {
    fn from(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }
}

#[derive(Default, Builder, Debug, Clone)]
#[builder(default)]
pub struct Address {
    pub index: i32,
    pub ip: IpNet,
    pub label: String,
    pub flags: u8,
    pub scope: u8,
    pub broadcast: Option<IpAddr>,
    pub peer: Option<IpNet>,
}

impl TryFrom<&[u8]> for Address {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let addr_msg: AddressMessage = bincode::deserialize(buf)?;
        let attrs = RouteAttrs::try_from(&buf[addr_msg.len()..])?;

        let mut addr = Self {
            index: addr_msg.index,
            scope: addr_msg.scope,
            flags: addr_msg.flags,
            ..Default::default()
        };

        let mut local = None;
        let mut dst = None;

        for attr in attrs {
            match attr.rta_type {
                libc::IFA_ADDRESS => dst = Some(vec_to_addr(&attr.payload)?),
                libc::IFA_LOCAL => local = Some(vec_to_addr(&attr.payload)?),
                libc::IFA_BROADCAST => addr.broadcast = Some(vec_to_addr(&attr.payload)?),
                libc::IFA_LABEL => addr.label = attr.payload.to_c_string()?,
                _ => {}
            }
        }

        // IFA_ADDRESS is the peer on point-to-point links; IFA_LOCAL is ours.
        match (local, dst) {
            (Some(local), Some(dst)) => {
                addr.ip = IpNet::new(local, addr_msg.prefix_len)?;
                if local != dst {
                    addr.peer = Some(IpNet::new(dst, addr_msg.prefix_len)?);
                }
            }
            (Some(ip), None) | (None, Some(ip)) => {
                addr.ip = IpNet::new(ip, addr_msg.prefix_len)?;
            }
            (None, None) => {}
        }

        Ok(addr)
    }
}

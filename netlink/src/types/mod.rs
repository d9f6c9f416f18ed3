use std::net::IpAddr;

use anyhow::Result;

use crate::error::NetlinkError;

pub mod addr;
pub mod link;
pub mod message;
pub mod routing;
pub mod rule;

pub fn vec_to_addr(vec: &[u8]) -> Result<IpAddr> {
    match vec.len() {
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(vec);
            Ok(IpAddr::from(buf))
        }
        16 => {
            let mut buf = [0u8; 16];
            buf.copy_from_slice(vec);
            Ok(IpAddr::from(buf))
        }
        len => Err(NetlinkError::InvalidLength(len).into()),
    }
}

pub fn addr_to_vec(ip: &IpAddr) -> (i32, Vec<u8>) {
    match ip {
        IpAddr::V4(ip) => (libc::AF_INET, ip.octets().to_vec()),
        IpAddr::V6(ip) => (libc::AF_INET6, ip.octets().to_vec()),
    }
}

use std::net::IpAddr;

use anyhow::Result;
use derive_builder::Builder;
use ipnet::IpNet;

use super::{
    message::{Attribute, RouteAttrs, RouteMessage},
    vec_to_addr,
};

pub enum RtCmd {
    Add,
    Delete,
}

#[derive(Default, Builder, Debug, Clone)]
#[builder(default)]
pub struct Routing {
    pub oif_index: i32,
    pub iif_index: i32,
    pub family: u8,
    pub dst: Option<IpNet>,
    pub src: Option<IpAddr>,
    pub gw: Option<IpAddr>,
    pub tos: u8,
    /// Full table id; 0 means the main table when adding.
    pub table: u32,
    pub protocol: u8,
    pub scope: u8,
    pub rtm_type: u8,
    pub flags: u32,
}

impl TryFrom<&[u8]> for Routing {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let rt_msg: RouteMessage = bincode::deserialize(buf)?;
        let rt_attrs = RouteAttrs::try_from(&buf[rt_msg.len()..])?;

        let mut routing = Self {
            family: rt_msg.family,
            tos: rt_msg.tos,
            table: rt_msg.table as u32,
            protocol: rt_msg.protocol,
            scope: rt_msg.scope,
            rtm_type: rt_msg.route_type,
            flags: rt_msg.flags,
            ..Default::default()
        };

        for attr in rt_attrs {
            match attr.rta_type {
                libc::RTA_GATEWAY => routing.gw = Some(vec_to_addr(&attr.payload)?),
                libc::RTA_PREFSRC => routing.src = Some(vec_to_addr(&attr.payload)?),
                libc::RTA_DST => {
                    routing.dst = Some(IpNet::new(vec_to_addr(&attr.payload)?, rt_msg.dst_len)?);
                }
                libc::RTA_OIF => routing.oif_index = attr.payload.to_i32()?,
                libc::RTA_IIF => routing.iif_index = attr.payload.to_i32()?,
                libc::RTA_TABLE => routing.table = attr.payload.to_u32()?,
                _ => {}
            }
        }

        Ok(routing)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::message::RouteAttr;

    use super::*;

    #[test]
    fn test_from_bytes() {
        let rt_msg = RouteMessage {
            family: 2,
            table: libc::RT_TABLE_UNSPEC,
            dst_len: 32,
            ..Default::default()
        };
        let mut rt_attrs = RouteAttrs::default();
        rt_attrs.push(RouteAttr::new(libc::RTA_DST, &[192, 168, 1, 1]));
        rt_attrs.push(RouteAttr::new(libc::RTA_OIF, &4i32.to_ne_bytes()));
        rt_attrs.push(RouteAttr::new(libc::RTA_TABLE, &300u32.to_ne_bytes()));

        let mut buf = RouteMessage::serialize(&rt_msg).unwrap();
        buf.extend_from_slice(rt_attrs.serialize().unwrap().as_slice());

        let routing = Routing::try_from(&buf[..]).unwrap();

        assert_eq!(routing.family, rt_msg.family);
        assert_eq!(routing.oif_index, 4);
        assert_eq!(routing.table, 300);
        assert_eq!(
            routing.dst,
            Some(IpNet::V4("192.168.1.1/32".parse().unwrap()))
        );
    }

    #[test]
    fn test_default_route_has_no_dst() {
        let rt_msg = RouteMessage {
            family: 2,
            table: libc::RT_TABLE_MAIN,
            ..Default::default()
        };
        let mut rt_attrs = RouteAttrs::default();
        rt_attrs.push(RouteAttr::new(libc::RTA_GATEWAY, &[192, 168, 50, 1]));

        let mut buf = RouteMessage::serialize(&rt_msg).unwrap();
        buf.extend_from_slice(rt_attrs.serialize().unwrap().as_slice());

        let routing = Routing::try_from(&buf[..]).unwrap();

        assert!(routing.dst.is_none());
        assert_eq!(routing.table, libc::RT_TABLE_MAIN as u32);
        assert_eq!(routing.gw, Some("192.168.50.1".parse().unwrap()));
    }
}

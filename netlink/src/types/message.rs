use std::{
    mem,
    ops::{Deref, DerefMut},
    vec,
};

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};

use crate::{align_of, handle::zero_terminated};

use super::link::{Kind, LinkAttrs, Namespace};

const RTA_ALIGNTO: usize = 0x4;
const RTA_HDR_LEN: usize = mem::size_of::<RtAttrHeader>();

const VETH_INFO_PEER: u16 = 1;

/// Anything that can be appended to a netlink request.
pub trait Attribute {
    /// Encoded length before trailing padding.
    fn len(&self) -> usize;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fixed-size family headers that lead every rtnetlink payload.
macro_rules! family_header {
    ($(#[$meta:meta])* $name:ident { $($field:ident: $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[repr(C)]
        #[derive(Serialize, Deserialize, Default, Debug)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Attribute for $name {
            fn len(&self) -> usize {
                mem::size_of::<Self>()
            }

            fn serialize(&self) -> Result<Vec<u8>> {
                Ok(bincode::serialize(self)?)
            }
        }
    };
}

family_header!(
    /// `struct ifinfomsg`
    LinkMessage {
        family: u8,
        _pad: u8,
        dev_type: u16,
        index: i32,
        flags: u32,
        change_mask: u32,
    }
);

family_header!(
    /// `struct ifaddrmsg`
    AddressMessage {
        family: u8,
        prefix_len: u8,
        flags: u8,
        scope: u8,
        index: i32,
    }
);

family_header!(
    /// `struct rtmsg`
    RouteMessage {
        family: u8,
        dst_len: u8,
        src_len: u8,
        tos: u8,
        table: u8,
        protocol: u8,
        scope: u8,
        route_type: u8,
        flags: u32,
    }
);

family_header!(
    /// `struct fib_rule_hdr`
    RuleMessage {
        family: u8,
        dst_len: u8,
        src_len: u8,
        tos: u8,
        table: u8,
        _res1: u8,
        _res2: u8,
        action: u8,
        flags: u32,
    }
);

impl LinkMessage {
    pub fn new(family: i32) -> Self {
        Self {
            family: family as u8,
            ..Default::default()
        }
    }
}

impl AddressMessage {
    pub fn new(family: i32) -> Self {
        Self {
            family: family as u8,
            ..Default::default()
        }
    }
}

impl RouteMessage {
    /// Header for a main-table unicast route.
    pub fn new() -> Self {
        Self {
            table: libc::RT_TABLE_MAIN,
            protocol: libc::RTPROT_BOOT,
            scope: libc::RT_SCOPE_UNIVERSE,
            route_type: libc::RTN_UNICAST,
            ..Default::default()
        }
    }

    pub fn new_delete_msg() -> Self {
        Self {
            table: libc::RT_TABLE_MAIN,
            scope: libc::RT_SCOPE_NOWHERE,
            ..Default::default()
        }
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize)]
struct RtAttrHeader {
    rta_len: u16,
    rta_type: u16,
}

/// A `struct rtattr` with its payload and any nested attributes.
#[derive(Default)]
pub struct RouteAttr {
    pub rta_type: u16,
    pub payload: Payload,
    nested: Vec<Box<dyn Attribute>>,
}

impl RouteAttr {
    pub fn new(rta_type: u16, payload: &[u8]) -> Self {
        Self {
            rta_type,
            payload: Payload::from(payload),
            nested: Vec::new(),
        }
    }

    pub fn add(&mut self, rta_type: u16, payload: &[u8]) {
        self.add_attribute(Box::new(RouteAttr::new(rta_type, payload)));
    }

    pub fn add_attribute(&mut self, attr: Box<dyn Attribute>) {
        self.nested.push(attr);
    }

    /// `IFLA_INFO_DATA` for link kinds that carry one.
    pub fn info_data(kind: &Kind) -> Option<Self> {
        match kind {
            Kind::Veth {
                attrs,
                peer_name,
                peer_hw_addr,
                peer_ns,
            } => Some(Self::veth_peer(attrs, peer_name, peer_hw_addr.as_deref(), peer_ns.as_ref())),
            _ => None,
        }
    }

    fn veth_peer(
        attrs: &LinkAttrs,
        peer_name: &str,
        peer_hw_addr: Option<&[u8]>,
        peer_ns: Option<&Namespace>,
    ) -> Self {
        let mut peer = RouteAttr::new(VETH_INFO_PEER, &[]);
        peer.add_attribute(Box::new(LinkMessage::new(libc::AF_UNSPEC)));
        peer.add(libc::IFLA_IFNAME, &zero_terminated(peer_name));

        if attrs.mtu > 0 {
            peer.add(libc::IFLA_MTU, &attrs.mtu.to_ne_bytes());
        }
        if attrs.tx_queue_len >= 0 {
            peer.add(libc::IFLA_TXQLEN, &attrs.tx_queue_len.to_ne_bytes());
        }
        if let Some(hw_addr) = peer_hw_addr {
            peer.add(libc::IFLA_ADDRESS, hw_addr);
        }

        match peer_ns {
            Some(Namespace::Pid(pid)) => peer.add(libc::IFLA_NET_NS_PID, &pid.to_ne_bytes()),
            Some(Namespace::Fd(fd)) => peer.add(libc::IFLA_NET_NS_FD, &fd.to_ne_bytes()),
            None => {}
        }

        let mut data = RouteAttr::new(libc::IFLA_INFO_DATA, &[]);
        data.add_attribute(Box::new(peer));
        data
    }
}

fn pad(buf: &mut Vec<u8>) {
    buf.resize(align_of(buf.len(), RTA_ALIGNTO), 0);
}

impl Attribute for RouteAttr {
    fn len(&self) -> usize {
        let own = RTA_HDR_LEN + self.payload.len();
        if self.nested.is_empty() {
            return own;
        }

        self.nested
            .iter()
            .fold(align_of(own, RTA_ALIGNTO), |len, attr| {
                len + align_of(attr.len(), RTA_ALIGNTO)
            })
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let len = u16::try_from(self.len())
            .map_err(|_| anyhow!("route attribute of type {} is too long", self.rta_type))?;

        let mut buf = Vec::with_capacity(align_of(len as usize, RTA_ALIGNTO));
        buf.extend_from_slice(&len.to_ne_bytes());
        buf.extend_from_slice(&self.rta_type.to_ne_bytes());
        buf.extend_from_slice(&self.payload);
        pad(&mut buf);

        for attr in &self.nested {
            buf.extend(attr.serialize()?);
            pad(&mut buf);
        }

        Ok(buf)
    }
}

impl TryFrom<&[u8]> for RouteAttr {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let header: RtAttrHeader = bincode::deserialize(buf)?;
        let len = header.rta_len as usize;

        if len < RTA_HDR_LEN || len > buf.len() {
            bail!("truncated route attribute of type {}", header.rta_type);
        }

        Ok(Self::new(header.rta_type, &buf[RTA_HDR_LEN..len]))
    }
}

/// Attributes following a family header, in wire order.
#[derive(Default)]
pub struct RouteAttrs(Vec<RouteAttr>);

impl TryFrom<&[u8]> for RouteAttrs {
    type Error = anyhow::Error;

    fn try_from(mut buf: &[u8]) -> Result<Self> {
        let mut attrs = Vec::new();

        while buf.len() >= RTA_HDR_LEN {
            let attr = RouteAttr::try_from(buf)?;
            let step = align_of(RTA_HDR_LEN + attr.payload.len(), RTA_ALIGNTO);
            attrs.push(attr);
            buf = buf.get(step..).unwrap_or_default();
        }

        Ok(Self(attrs))
    }
}

impl RouteAttrs {
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        for attr in &self.0 {
            buf.extend(attr.serialize()?);
        }
        Ok(buf)
    }
}

impl IntoIterator for RouteAttrs {
    type Item = RouteAttr;
    type IntoIter = vec::IntoIter<RouteAttr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl Deref for RouteAttrs {
    type Target = Vec<RouteAttr>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for RouteAttrs {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Raw attribute value in host byte order.
#[derive(Default, Debug, PartialEq)]
pub struct Payload(Vec<u8>);

impl From<&[u8]> for Payload {
    fn from(buf: &[u8]) -> Self {
        Self(buf.to_vec())
    }
}

impl Deref for Payload {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Payload {
    /// NUL-terminated string, as the kernel sends names and labels.
    pub fn to_c_string(&self) -> Result<String> {
        let text = self.split(|&b| b == 0).next().unwrap_or_default();
        Ok(String::from_utf8(text.to_vec())?)
    }

    pub fn to_u8(&self) -> Result<u8> {
        Ok(u8::from_ne_bytes(self.fixed()?))
    }

    pub fn to_u32(&self) -> Result<u32> {
        Ok(u32::from_ne_bytes(self.fixed()?))
    }

    pub fn to_i32(&self) -> Result<i32> {
        Ok(i32::from_ne_bytes(self.fixed()?))
    }

    fn fixed<const N: usize>(&self) -> Result<[u8; N]> {
        self.get(..N)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| anyhow!("attribute payload has {} bytes, want {N}", self.len()))
    }
}

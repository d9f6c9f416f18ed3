use std::os::fd::RawFd;

use anyhow::Result;

use super::message::{Attribute, LinkMessage, RouteAttrs};

pub trait Link: std::fmt::Debug {
    fn link_type(&self) -> &str;
    fn attrs(&self) -> &LinkAttrs;
    fn kind(&self) -> &Kind;
}

impl Link for Box<dyn Link> {
    fn link_type(&self) -> &str {
        self.as_ref().link_type()
    }

    fn attrs(&self) -> &LinkAttrs {
        self.as_ref().attrs()
    }

    fn kind(&self) -> &Kind {
        self.as_ref().kind()
    }
}

#[derive(Debug, Clone)]
pub enum Namespace {
    Pid(u32),
    Fd(RawFd),
}

#[derive(Default, Debug, Clone)]
pub struct LinkAttrs {
    pub index: i32,
    pub name: String,
    pub mtu: u32,
    pub tx_queue_len: i32,
    pub hw_addr: Vec<u8>,
    pub flags: u32,
    pub link_type: String,
    pub oper_state: u8,
    /// `IFLA_LINK`; for a veth this is the peer's index in the peer's namespace.
    pub parent_index: i32,
    pub master_index: i32,
    pub netns_id: Option<i32>,
}

impl LinkAttrs {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tx_queue_len: -1,
            ..Default::default()
        }
    }

    pub fn with_index(index: i32) -> Self {
        Self {
            index,
            tx_queue_len: -1,
            ..Default::default()
        }
    }

    pub fn is_up(&self) -> bool {
        self.flags & libc::IFF_UP as u32 != 0
    }

    pub fn mac(&self) -> String {
        self.hw_addr
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

#[derive(Debug, Clone)]
pub enum Kind {
    Device(LinkAttrs),
    Dummy(LinkAttrs),
    Veth {
        attrs: LinkAttrs,
        peer_name: String,
        peer_hw_addr: Option<Vec<u8>>,
        peer_ns: Option<Namespace>,
    },
}

impl Kind {
    pub fn new_veth(name: &str, peer_name: &str, mtu: u32, peer_ns: Option<Namespace>) -> Self {
        let mut attrs = LinkAttrs::new(name);
        attrs.mtu = mtu;

        Self::Veth {
            attrs,
            peer_name: peer_name.to_string(),
            peer_hw_addr: None,
            peer_ns,
        }
    }

    fn attrs_mut(&mut self) -> &mut LinkAttrs {
        match self {
            Kind::Device(attrs) | Kind::Dummy(attrs) | Kind::Veth { attrs, .. } => attrs,
        }
    }
}

impl Link for Kind {
    fn link_type(&self) -> &str {
        match self {
            Kind::Device(_) => "device",
            Kind::Dummy(_) => "dummy",
            Kind::Veth { .. } => "veth",
        }
    }

    fn attrs(&self) -> &LinkAttrs {
        match self {
            Kind::Device(attrs) | Kind::Dummy(attrs) | Kind::Veth { attrs, .. } => attrs,
        }
    }

    fn kind(&self) -> &Kind {
        self
    }
}

impl TryFrom<&[u8]> for Kind {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let msg: LinkMessage = bincode::deserialize(buf)?;
        let attrs = RouteAttrs::try_from(&buf[msg.len()..])?;

        let mut base = LinkAttrs {
            index: msg.index,
            flags: msg.flags,
            tx_queue_len: -1,
            ..Default::default()
        };
        let mut info_kind = String::new();

        for attr in attrs {
            match attr.rta_type {
                libc::IFLA_IFNAME => base.name = attr.payload.to_c_string()?,
                libc::IFLA_MTU => base.mtu = attr.payload.to_u32()?,
                libc::IFLA_TXQLEN => base.tx_queue_len = attr.payload.to_i32()?,
                libc::IFLA_ADDRESS => base.hw_addr = attr.payload.to_vec(),
                libc::IFLA_OPERSTATE => base.oper_state = attr.payload.to_u8()?,
                libc::IFLA_LINK => base.parent_index = attr.payload.to_i32()?,
                libc::IFLA_MASTER => base.master_index = attr.payload.to_i32()?,
                libc::IFLA_LINK_NETNSID => base.netns_id = Some(attr.payload.to_i32()?),
                libc::IFLA_LINKINFO => {
                    let infos = RouteAttrs::try_from(attr.payload.as_slice())?;
                    if let Some(kind) = infos
                        .iter()
                        .find(|info| info.rta_type == libc::IFLA_INFO_KIND)
                    {
                        info_kind = kind.payload.to_c_string()?;
                    }
                }
                _ => {}
            }
        }

        let mut link = match info_kind.as_str() {
            "veth" => Kind::Veth {
                attrs: LinkAttrs::default(),
                peer_name: String::new(),
                peer_hw_addr: None,
                peer_ns: None,
            },
            "dummy" => Kind::Dummy(LinkAttrs::default()),
            _ => Kind::Device(LinkAttrs::default()),
        };

        base.link_type = link.link_type().to_string();
        *link.attrs_mut() = base;

        Ok(link)
    }
}

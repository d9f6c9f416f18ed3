use std::ops::{Deref, DerefMut};

use anyhow::{bail, Result};

use crate::{
    core::message::Message,
    error::{is_not_found, NetlinkError},
    types::{
        link::{Kind, Link, LinkAttrs},
        message::{Attribute, LinkMessage, RouteAttr},
    },
};

use super::{sock_handle::SocketHandle, zero_terminated};

pub struct LinkHandle<'a> {
    pub socket: &'a mut SocketHandle,
}

impl<'a> Deref for LinkHandle<'a> {
    type Target = SocketHandle;

    fn deref(&self) -> &Self::Target {
        self.socket
    }
}

impl DerefMut for LinkHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.socket
    }
}

impl<'a> From<&'a mut SocketHandle> for LinkHandle<'a> {
    fn from(socket: &'a mut SocketHandle) -> Self {
        Self { socket }
    }
}

impl LinkHandle<'_> {
    pub fn add<T: Link + ?Sized>(&mut self, link: &T, flags: i32) -> Result<()> {
        let base = link.attrs();
        let mut req = Message::new(libc::RTM_NEWLINK, flags);
        let mut msg = LinkMessage::new(libc::AF_UNSPEC);

        if base.index != 0 {
            msg.index = base.index;
        }

        if base.is_up() {
            msg.flags = libc::IFF_UP as u32;
            msg.change_mask = libc::IFF_UP as u32;
        }

        req.add(&msg.serialize()?);

        let name = RouteAttr::new(libc::IFLA_IFNAME, &zero_terminated(&base.name));
        req.add(&name.serialize()?);

        if base.mtu > 0 {
            let attr = RouteAttr::new(libc::IFLA_MTU, &base.mtu.to_ne_bytes());
            req.add(&attr.serialize()?);
        }

        if base.tx_queue_len > 0 {
            let attr = RouteAttr::new(libc::IFLA_TXQLEN, &base.tx_queue_len.to_ne_bytes());
            req.add(&attr.serialize()?);
        }

        if !base.hw_addr.is_empty() {
            let attr = RouteAttr::new(libc::IFLA_ADDRESS, &base.hw_addr);
            req.add(&attr.serialize()?);
        }

        let mut link_info = RouteAttr::new(libc::IFLA_LINKINFO, &[]);

        link_info.add(libc::IFLA_INFO_KIND, link.link_type().as_bytes());

        if let Some(data) = RouteAttr::info_data(link.kind()) {
            link_info.add_attribute(Box::new(data));
        }

        req.add(&link_info.serialize()?);

        self.request(&mut req, 0)?;

        Ok(())
    }

    pub fn delete<T: Link + ?Sized>(&mut self, link: &T) -> Result<()> {
        let base = link.attrs();

        let mut req = Message::new(libc::RTM_DELLINK, libc::NLM_F_ACK);

        let mut msg = LinkMessage::new(libc::AF_UNSPEC);
        msg.index = base.index;

        req.add(&msg.serialize()?);

        if base.index == 0 && !base.name.is_empty() {
            let name = RouteAttr::new(libc::IFLA_IFNAME, &zero_terminated(&base.name));
            req.add(&name.serialize()?);
        }

        self.request(&mut req, 0)?;

        Ok(())
    }

    /// Looks a link up by index, or by name when no index is set.
    pub fn get(&mut self, attr: &LinkAttrs) -> Result<Box<dyn Link>> {
        let mut req = Message::new(libc::RTM_GETLINK, libc::NLM_F_ACK);
        let mut msg = LinkMessage::new(libc::AF_UNSPEC);

        if attr.index != 0 {
            msg.index = attr.index;
        }

        req.add(&msg.serialize()?);

        if attr.index == 0 && !attr.name.is_empty() {
            let name = RouteAttr::new(libc::IFLA_IFNAME, &zero_terminated(&attr.name));
            req.add(&name.serialize()?);
        }

        let msgs = match self.request(&mut req, libc::RTM_NEWLINK) {
            Ok(msgs) => msgs,
            Err(e) if is_not_found(&e) => return Err(NetlinkError::LinkNotFound.into()),
            Err(e) => return Err(e),
        };

        match msgs.len() {
            0 => Err(NetlinkError::LinkNotFound.into()),
            1 => Ok(Box::new(Kind::try_from(msgs[0].as_slice())?)),
            _ => bail!("multiple links found"),
        }
    }

    pub fn up<T: Link + ?Sized>(&mut self, link: &T) -> Result<()> {
        let mut req = Message::new(libc::RTM_NEWLINK, libc::NLM_F_ACK);
        let base = link.attrs();

        let mut msg = LinkMessage::new(libc::AF_UNSPEC);
        msg.index = base.index;
        msg.flags = libc::IFF_UP as u32;
        msg.change_mask = libc::IFF_UP as u32;

        req.add(&msg.serialize()?);

        self.request(&mut req, 0)?;

        Ok(())
    }
}

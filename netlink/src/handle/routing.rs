use std::ops::{Deref, DerefMut};

use anyhow::{bail, Result};
use ipnet::IpNet;

use crate::{
    core::message::Message,
    types::{
        addr_to_vec,
        message::{Attribute, RouteAttr, RouteMessage},
        routing::Routing,
    },
};

use super::sock_handle::SocketHandle;

pub struct RouteHandle<'a> {
    pub socket: &'a mut SocketHandle,
}

impl<'a> Deref for RouteHandle<'a> {
    type Target = SocketHandle;

    fn deref(&self) -> &Self::Target {
        self.socket
    }
}

impl DerefMut for RouteHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.socket
    }
}

impl<'a> From<&'a mut SocketHandle> for RouteHandle<'a> {
    fn from(socket: &'a mut SocketHandle) -> Self {
        Self { socket }
    }
}

impl RouteHandle<'_> {
    pub fn handle(&mut self, route: &Routing, proto: u16, flags: i32) -> Result<()> {
        let mut req = Message::new(proto, flags);

        let mut msg = match proto {
            libc::RTM_DELROUTE => RouteMessage::new_delete_msg(),
            _ => RouteMessage::new(),
        };

        let mut attrs = vec![];

        if let Some(dst) = route.dst {
            let (family, dst_data) = match dst {
                IpNet::V4(ip) => (libc::AF_INET, ip.addr().octets().to_vec()),
                IpNet::V6(ip) => (libc::AF_INET6, ip.addr().octets().to_vec()),
            };
            msg.family = family as u8;
            msg.dst_len = dst.prefix_len();

            attrs.push(RouteAttr::new(libc::RTA_DST, &dst_data));
        }

        if let Some(src) = route.src {
            let (family, src_data) = addr_to_vec(&src);

            if msg.family == 0 {
                msg.family = family as u8;
            } else if msg.family != family as u8 {
                bail!("src and dst address family mismatch");
            }

            attrs.push(RouteAttr::new(libc::RTA_PREFSRC, &src_data));
        }

        if let Some(gw) = route.gw {
            let (family, gw_data) = addr_to_vec(&gw);

            if msg.family == 0 {
                msg.family = family as u8;
            } else if msg.family != family as u8 {
                bail!("gw, src and dst address family mismatch");
            }

            attrs.push(RouteAttr::new(libc::RTA_GATEWAY, &gw_data));
        }

        if msg.family == 0 {
            msg.family = match route.family {
                0 => libc::AF_INET as u8,
                family => family,
            };
        }

        if route.oif_index > 0 {
            attrs.push(RouteAttr::new(libc::RTA_OIF, &route.oif_index.to_ne_bytes()));
        }

        // ids above 255 only fit in RTA_TABLE
        if route.table > 0 {
            msg.table = match u8::try_from(route.table) {
                Ok(table) => table,
                Err(_) => libc::RT_TABLE_UNSPEC,
            };
            attrs.push(RouteAttr::new(libc::RTA_TABLE, &route.table.to_ne_bytes()));
        }

        if proto != libc::RTM_DELROUTE || route.scope != libc::RT_SCOPE_UNIVERSE {
            msg.scope = route.scope;
        }

        if route.protocol > 0 {
            msg.protocol = route.protocol;
        }

        if route.rtm_type > 0 {
            msg.route_type = route.rtm_type;
        }

        msg.tos = route.tos;
        msg.flags = route.flags;

        req.add(&msg.serialize()?);

        for attr in attrs {
            req.add(&attr.serialize()?);
        }

        self.request(&mut req, 0)?;

        Ok(())
    }

    /// Dumps the routes of every table for `family`.
    pub fn list(&mut self, family: i32) -> Result<Vec<Routing>> {
        let mut req = Message::new(libc::RTM_GETROUTE, libc::NLM_F_DUMP);
        let msg = RouteMessage {
            family: family as u8,
            ..Default::default()
        };
        req.add(&msg.serialize()?);

        self.request(&mut req, libc::RTM_NEWROUTE)?
            .iter()
            .map(|m| Routing::try_from(m.as_slice()))
            .collect()
    }
}

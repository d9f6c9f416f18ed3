use std::ops::{Deref, DerefMut};

use anyhow::{bail, Result};
use ipnet::IpNet;

use crate::{
    core::message::Message,
    types::{
        message::{Attribute, RouteAttr, RuleMessage},
        rule::{
            Rule, FRA_DST, FRA_FWMARK, FRA_FWMASK, FRA_IIFNAME, FRA_OIFNAME, FRA_PRIORITY,
            FRA_SRC, FRA_TABLE, FR_ACT_TO_TBL, RTM_GETRULE, RTM_NEWRULE,
        },
    },
};

use super::{sock_handle::SocketHandle, zero_terminated};

pub struct RuleHandle<'a> {
    pub socket: &'a mut SocketHandle,
}

impl<'a> Deref for RuleHandle<'a> {
    type Target = SocketHandle;

    fn deref(&self) -> &Self::Target {
        self.socket
    }
}

impl DerefMut for RuleHandle<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.socket
    }
}

impl<'a> From<&'a mut SocketHandle> for RuleHandle<'a> {
    fn from(socket: &'a mut SocketHandle) -> Self {
        Self { socket }
    }
}

fn net_data(net: &IpNet) -> (i32, Vec<u8>) {
    match net {
        IpNet::V4(ip) => (libc::AF_INET, ip.addr().octets().to_vec()),
        IpNet::V6(ip) => (libc::AF_INET6, ip.addr().octets().to_vec()),
    }
}

impl RuleHandle<'_> {
    pub fn handle(&mut self, rule: &Rule, proto: u16, flags: i32) -> Result<()> {
        let mut req = Message::new(proto, flags);
        let mut msg = RuleMessage {
            tos: rule.tos,
            action: rule.action,
            ..Default::default()
        };

        if proto == RTM_NEWRULE && msg.action == 0 {
            msg.action = FR_ACT_TO_TBL;
        }

        let mut attrs = vec![];

        if let Some(dst) = &rule.dst {
            let (family, data) = net_data(dst);
            msg.family = family as u8;
            msg.dst_len = dst.prefix_len();
            attrs.push(RouteAttr::new(FRA_DST, &data));
        }

        if let Some(src) = &rule.src {
            let (family, data) = net_data(src);

            if msg.family == 0 {
                msg.family = family as u8;
            } else if msg.family != family as u8 {
                bail!("src and dst address family mismatch");
            }

            msg.src_len = src.prefix_len();
            attrs.push(RouteAttr::new(FRA_SRC, &data));
        }

        if msg.family == 0 {
            msg.family = match rule.family {
                0 => libc::AF_INET as u8,
                family => family,
            };
        }

        if let Some(priority) = rule.priority {
            attrs.push(RouteAttr::new(FRA_PRIORITY, &priority.to_ne_bytes()));
        }

        if let Some(mark) = rule.mark {
            attrs.push(RouteAttr::new(FRA_FWMARK, &mark.to_ne_bytes()));
        }

        if let Some(mask) = rule.mask {
            attrs.push(RouteAttr::new(FRA_FWMASK, &mask.to_ne_bytes()));
        }

        if rule.table > 0 {
            msg.table = match u8::try_from(rule.table) {
                Ok(table) => table,
                Err(_) => libc::RT_TABLE_UNSPEC,
            };
            attrs.push(RouteAttr::new(FRA_TABLE, &rule.table.to_ne_bytes()));
        }

        if let Some(name) = &rule.iif_name {
            attrs.push(RouteAttr::new(FRA_IIFNAME, &zero_terminated(name)));
        }

        if let Some(name) = &rule.oif_name {
            attrs.push(RouteAttr::new(FRA_OIFNAME, &zero_terminated(name)));
        }

        req.add(&msg.serialize()?);

        for attr in attrs {
            req.add(&attr.serialize()?);
        }

        self.request(&mut req, 0)?;

        Ok(())
    }

    pub fn list(&mut self, family: i32) -> Result<Vec<Rule>> {
        let mut req = Message::new(RTM_GETRULE, libc::NLM_F_DUMP);
        let msg = RuleMessage {
            family: family as u8,
            ..Default::default()
        };
        req.add(&msg.serialize()?);

        self.request(&mut req, RTM_NEWRULE)?
            .iter()
            .map(|m| Rule::try_from(m.as_slice()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::is_not_found,
        test_setup,
        types::rule::{RuleBuilder, RTM_DELRULE},
    };

    use super::*;

    #[test]
    fn test_rule_add_list_del() {
        test_setup!();
        let mut handle = SocketHandle::new(libc::NETLINK_ROUTE).unwrap();
        let mut rule_handle = handle.handle_rule();

        let rule = RuleBuilder::default()
            .src(Some("10.0.1.5/32".parse().unwrap()))
            .priority(Some(1024))
            .table(300)
            .build()
            .unwrap();

        rule_handle
            .handle(
                &rule,
                RTM_NEWRULE,
                libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK,
            )
            .unwrap();

        let found: Vec<_> = rule_handle
            .list(libc::AF_INET)
            .unwrap()
            .into_iter()
            .filter(|r| r.src == rule.src)
            .collect();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].table, 300);
        assert_eq!(found[0].priority, Some(1024));

        rule_handle
            .handle(&found[0], RTM_DELRULE, libc::NLM_F_ACK)
            .unwrap();

        let err = rule_handle
            .handle(&found[0], RTM_DELRULE, libc::NLM_F_ACK)
            .unwrap_err();
        assert!(is_not_found(&err));
    }

    #[test]
    fn test_mark_rule_in_main_table() {
        test_setup!();
        let mut handle = SocketHandle::new(libc::NETLINK_ROUTE).unwrap();
        let mut rule_handle = handle.handle_rule();

        let rule = RuleBuilder::default()
            .mark(Some(0x2000))
            .mask(Some(0x2000))
            .priority(Some(512))
            .table(libc::RT_TABLE_MAIN as u32)
            .build()
            .unwrap();

        rule_handle
            .handle(
                &rule,
                RTM_NEWRULE,
                libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK,
            )
            .unwrap();

        let rules = rule_handle.list(libc::AF_INET).unwrap();
        let marked: Vec<_> = rules.iter().filter(|r| r.mark == Some(0x2000)).collect();

        assert_eq!(marked.len(), 1);
        assert_eq!(marked[0].table, libc::RT_TABLE_MAIN as u32);
    }
}

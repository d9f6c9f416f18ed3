use std::collections::{hash_map::Entry, HashMap};

use anyhow::Result;

use crate::{
    handle::sock_handle::SocketHandle,
    types::{
        addr::{AddrCmd, AddrFamily, Address},
        link::{Link, LinkAttrs},
        routing::{Routing, RtCmd},
        rule::{Rule, RuleCmd, RTM_DELRULE, RTM_NEWRULE},
    },
};

/// Entry point for rtnetlink requests.
///
/// Sockets are opened on first use and stay bound to the network namespace
/// that was current at that moment.
#[derive(Default)]
pub struct Netlink {
    pub sockets: HashMap<i32, SocketHandle>,
}

impl Netlink {
    pub fn new() -> Self {
        Self::default()
    }

    fn route_socket(&mut self) -> Result<&mut SocketHandle> {
        Ok(match self.sockets.entry(libc::NETLINK_ROUTE) {
            Entry::Occupied(e) => e.into_mut(),
            Entry::Vacant(e) => e.insert(SocketHandle::new(libc::NETLINK_ROUTE)?),
        })
    }

    pub fn link_get(&mut self, attr: &LinkAttrs) -> Result<Box<dyn Link>> {
        self.route_socket()?.handle_link().get(attr)
    }

    pub fn link_get_by_index(&mut self, index: i32) -> Result<Box<dyn Link>> {
        self.link_get(&LinkAttrs::with_index(index))
    }

    pub fn link_add<T: Link + ?Sized>(&mut self, link: &T) -> Result<()> {
        let flags = libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK;
        self.route_socket()?.handle_link().add(link, flags)
    }

    pub fn link_del<T: Link + ?Sized>(&mut self, link: &T) -> Result<()> {
        self.route_socket()?.handle_link().delete(link)
    }

    pub fn link_up<T: Link + ?Sized>(&mut self, link: &T) -> Result<()> {
        self.route_socket()?.handle_link().up(link)
    }

    pub fn addr_list(
        &mut self,
        link: &(impl Link + ?Sized),
        family: AddrFamily,
    ) -> Result<Vec<Address>> {
        self.route_socket()?
            .handle_addr()
            .list(link, family.into())
    }

    pub fn addr_add(&mut self, link: &(impl Link + ?Sized), addr: &Address) -> Result<()> {
        self.addr_handle(AddrCmd::Add, link, addr)
    }

    pub fn addr_del(&mut self, link: &(impl Link + ?Sized), addr: &Address) -> Result<()> {
        self.addr_handle(AddrCmd::Delete, link, addr)
    }

    fn addr_handle(
        &mut self,
        command: AddrCmd,
        link: &(impl Link + ?Sized),
        addr: &Address,
    ) -> Result<()> {
        let (proto, flags) = match command {
            AddrCmd::Add => (
                libc::RTM_NEWADDR,
                libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK,
            ),
            AddrCmd::Delete => (libc::RTM_DELADDR, libc::NLM_F_ACK),
        };

        self.route_socket()?
            .handle_addr()
            .handle(link, addr, proto, flags)
    }

    pub fn route_add(&mut self, route: &Routing) -> Result<()> {
        self.route_handle(RtCmd::Add, route)
    }

    pub fn route_del(&mut self, route: &Routing) -> Result<()> {
        self.route_handle(RtCmd::Delete, route)
    }

    pub fn route_list(&mut self, family: AddrFamily) -> Result<Vec<Routing>> {
        self.route_socket()?.handle_route().list(family.into())
    }

    /// Routes of `family` in `table` only.
    pub fn route_list_filtered(&mut self, family: AddrFamily, table: u32) -> Result<Vec<Routing>> {
        Ok(self
            .route_list(family)?
            .into_iter()
            .filter(|route| route.table == table)
            .collect())
    }

    fn route_handle(&mut self, cmd: RtCmd, route: &Routing) -> Result<()> {
        let (proto, flags) = match cmd {
            RtCmd::Add => (
                libc::RTM_NEWROUTE,
                libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK,
            ),
            RtCmd::Delete => (libc::RTM_DELROUTE, libc::NLM_F_ACK),
        };

        self.route_socket()?
            .handle_route()
            .handle(route, proto, flags)
    }

    pub fn rule_add(&mut self, rule: &Rule) -> Result<()> {
        self.rule_handle(RuleCmd::Add, rule)
    }

    pub fn rule_del(&mut self, rule: &Rule) -> Result<()> {
        self.rule_handle(RuleCmd::Delete, rule)
    }

    pub fn rule_list(&mut self, family: AddrFamily) -> Result<Vec<Rule>> {
        self.route_socket()?.handle_rule().list(family.into())
    }

    fn rule_handle(&mut self, cmd: RuleCmd, rule: &Rule) -> Result<()> {
        let (proto, flags) = match cmd {
            RuleCmd::Add => (
                RTM_NEWRULE,
                libc::NLM_F_CREATE | libc::NLM_F_EXCL | libc::NLM_F_ACK,
            ),
            RuleCmd::Delete => (RTM_DELRULE, libc::NLM_F_ACK),
        };

        self.route_socket()?
            .handle_rule()
            .handle(rule, proto, flags)
    }
}

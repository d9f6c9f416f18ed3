use std::net::IpAddr;

use anyhow::{Context, Result};
use ipnet::IpNet;
use ptproute_netlink::{
    is_not_found,
    types::{
        addr::AddrFamily,
        link::{Kind, Link, LinkAttrs},
        rule::Rule,
    },
    Netlink,
};
use tracing::{debug, info};

use crate::netns::NetNs;

/// What DEL needs from the container side, read before leaving the namespace.
#[derive(Debug, Default)]
pub struct Discovered {
    pub addrs: Vec<IpNet>,
    /// Host-side index of the veth peer.
    pub peer_index: Option<i32>,
}

pub fn discover(netns: &NetNs, if_name: &str) -> Result<Discovered> {
    netns.run(|_| {
        let mut netlink = Netlink::new();

        let link = match netlink.link_get(&LinkAttrs::new(if_name)) {
            Ok(link) => link,
            Err(e) if is_not_found(&e) => {
                debug!("{if_name} already removed");
                return Ok(Discovered::default());
            }
            Err(e) => return Err(e).with_context(|| format!("failed to lookup {if_name:?}")),
        };

        let addrs = netlink
            .addr_list(&link, AddrFamily::All)
            .with_context(|| format!("failed to get IP addresses for {if_name:?}"))?
            .into_iter()
            .filter(|addr| addr.scope == libc::RT_SCOPE_UNIVERSE)
            .map(|addr| addr.ip)
            .collect();

        let attrs = link.attrs();
        let peer_index = (link.link_type() == "veth" && attrs.parent_index > 0)
            .then_some(attrs.parent_index);

        Ok(Discovered { addrs, peer_index })
    })
}

#[derive(Debug, PartialEq, Eq)]
pub enum RuleMatch {
    /// Traffic to the pod, looked up in the main table.
    Dst,
    /// Traffic from the pod, routed through its own table.
    Src,
}

pub fn rule_match(rule: &Rule, ip: IpAddr) -> Option<RuleMatch> {
    if rule.dst.is_some_and(|dst| dst.addr() == ip) {
        return Some(RuleMatch::Dst);
    }
    if rule.src.is_some_and(|src| src.addr() == ip) {
        return Some(RuleMatch::Src);
    }
    None
}

// Main, local and default tables are never a pod's own.
fn is_pod_table(table: u32) -> bool {
    table != 0 && !(253..=255).contains(&table)
}

fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if is_not_found(&e) => Ok(()),
        other => other,
    }
}

fn delete_rule(netlink: &mut Netlink, rule: &Rule) -> Result<()> {
    ignore_missing(netlink.rule_del(rule)).with_context(|| format!("failed to delete rule {rule:?}"))
}

/// Removes every rule referencing `ip` and empties the tables its source
/// rules point at.
pub fn remove_policy(netlink: &mut Netlink, ip: IpAddr) -> Result<()> {
    let family = AddrFamily::from(&ip);
    let rules = netlink.rule_list(family).context("failed to list rules")?;

    for rule in rules {
        match rule_match(&rule, ip) {
            Some(RuleMatch::Dst) => delete_rule(netlink, &rule)?,
            Some(RuleMatch::Src) => {
                if is_pod_table(rule.table) {
                    let routes = netlink
                        .route_list_filtered(family, rule.table)
                        .with_context(|| format!("failed to list routes for table {}", rule.table))?;

                    for route in routes {
                        ignore_missing(netlink.route_del(&route))
                            .with_context(|| format!("failed to delete route {route:?}"))?;
                    }
                }
                delete_rule(netlink, &rule)?;
                info!("released routing table {} of {ip}", rule.table);
            }
            None => {}
        }
    }

    Ok(())
}

pub fn delete_peer(netlink: &mut Netlink, index: i32) -> Result<()> {
    let link = Kind::Device(LinkAttrs::with_index(index));
    ignore_missing(netlink.link_del(&link)).with_context(|| format!("failed to delete veth {index}"))
}

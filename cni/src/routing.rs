use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use ipnet::IpNet;
use ptproute_netlink::{
    types::{
        addr::Address,
        link::{Link, LinkAttrs},
        routing::Routing,
        rule::Rule,
    },
    Netlink,
};
use rand::Rng;
use tracing::{debug, info};

use crate::{
    arp,
    error::best_effort,
    interface::Interface,
    ip::IpConfig,
    table::{self, AttemptError},
    MAIN_TABLE_RULE_PRIORITY, POD_RULE_PRIORITY,
};

pub fn main_table() -> u32 {
    libc::RT_TABLE_MAIN as u32
}

fn seed_routes(table: u32, oif_index: i32, gw: IpAddr) -> [Routing; 2] {
    let gw_route = Routing {
        oif_index,
        dst: Some(IpNet::from(gw)),
        scope: libc::RT_SCOPE_LINK,
        table,
        ..Default::default()
    };
    let default_route = Routing {
        oif_index,
        gw: Some(gw),
        scope: libc::RT_SCOPE_UNIVERSE,
        table,
        ..Default::default()
    };

    [gw_route, default_route]
}

/// Populates `table` with the gateway and default routes, or leaves it empty.
fn claim_table(netlink: &mut Netlink, table: u32, oif_index: i32, gw: IpAddr) -> Result<()> {
    let [gw_route, default_route] = seed_routes(table, oif_index, gw);

    netlink
        .route_add(&gw_route)
        .with_context(|| format!("failed to add gateway route to table {table}"))?;

    if let Err(e) = netlink.route_add(&default_route) {
        best_effort("seed route rollback", netlink.route_del(&gw_route));
        return Err(e).with_context(|| format!("failed to add default route to table {table}"));
    }

    Ok(())
}

/// Allocates a table routed through `uplink_index` and points every pod
/// address at it with a source rule.
pub async fn add_pod_route_table(
    netlink: &mut Netlink,
    ips: &[IpConfig],
    uplink_index: i32,
    gw: IpAddr,
    table_start: u32,
    rng: &mut impl Rng,
) -> Result<u32> {
    let table = table::acquire(table_start, rng, |start| {
        let table = table::find_free_table(netlink, start).map_err(AttemptError::Fatal)?;
        claim_table(netlink, table, uplink_index, gw).map_err(AttemptError::Collision)?;
        Ok(table)
    })
    .await?;

    for ip in ips {
        let rule = Rule {
            src: Some(ip.host_net()),
            priority: Some(POD_RULE_PRIORITY),
            table,
            ..Default::default()
        };

        netlink
            .rule_add(&rule)
            .with_context(|| format!("failed to add policy rule from {} to table {table}", ip.address))?;
    }

    info!("pod route table {table} via {gw}");
    Ok(table)
}

/// Routes the pod addresses to the host end of the veth and sets up their
/// egress table through the uplink at `uplink_index`.
#[allow(clippy::too_many_arguments)]
pub async fn setup_host_veth(
    netlink: &mut Netlink,
    veth_name: &str,
    host_addrs: &[Address],
    ips: &[IpConfig],
    uplink_index: i32,
    gw: IpAddr,
    table_start: u32,
    rng: &mut impl Rng,
) -> Result<Interface> {
    if ips.is_empty() {
        return Ok(Interface::new(veth_name, String::new(), ""));
    }

    let veth = netlink
        .link_get(&LinkAttrs::new(veth_name))
        .with_context(|| format!("failed to lookup {veth_name}"))?;
    netlink.link_up(&veth)?;

    let attrs = veth.attrs().clone();
    let interface = Interface::new(&attrs.name, attrs.mac(), "");

    for ip in ips {
        let dst = ip.host_net();

        netlink
            .route_add(&Routing {
                oif_index: attrs.index,
                dst: Some(dst),
                scope: libc::RT_SCOPE_LINK,
                ..Default::default()
            })
            .with_context(|| format!("failed to add host route dst {dst}"))?;

        let rule = Rule {
            dst: Some(dst),
            priority: Some(MAIN_TABLE_RULE_PRIORITY),
            table: main_table(),
            ..Default::default()
        };
        netlink
            .rule_add(&rule)
            .with_context(|| format!("failed to add policy rule to {dst}"))?;
    }

    add_pod_route_table(netlink, ips, uplink_index, gw, table_start, rng)
        .await
        .context("failed to add policy rules")?;

    for addr in host_addrs {
        if let IpAddr::V4(ip) = addr.ip.addr() {
            announce(ip, &attrs);
        }
    }

    debug!("host veth {veth_name} ready");
    Ok(interface)
}

pub(crate) fn announce(ip: Ipv4Addr, link: &LinkAttrs) {
    best_effort(
        "gratuitous arp",
        arp::announce(ip, link.index, &link.hw_addr),
    );
}

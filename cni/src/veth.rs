use std::net::IpAddr;

use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use ptproute_netlink::{
    is_exists, is_not_found,
    types::{
        addr::Address,
        link::{Kind, Link, LinkAttrs, Namespace},
        routing::Routing,
    },
    Netlink,
};
use rand::Rng;
use tracing::{debug, info};

use crate::{interface::Interface, ip::IpConfig, netns::NetNs, routing::announce};

const NAME_ATTEMPTS: usize = 10;

#[derive(Debug)]
pub struct ContainerVeth {
    pub host_veth_name: String,
    pub container: Interface,
}

fn random_veth_name(rng: &mut impl Rng) -> String {
    format!("veth{}", hex::encode(rng.gen::<[u8; 4]>()))
}

/// Creates `if_name` in the current namespace with its peer in `host_ns`.
fn create_veth(netlink: &mut Netlink, if_name: &str, mtu: u32, host_ns: &NetNs) -> Result<String> {
    let mut rng = rand::thread_rng();

    for _ in 0..NAME_ATTEMPTS {
        let peer_name = random_veth_name(&mut rng);
        let veth = Kind::new_veth(if_name, &peer_name, mtu, Some(Namespace::Fd(host_ns.fd())));

        match netlink.link_add(&veth) {
            Ok(()) => return Ok(peer_name),
            Err(e) if is_exists(&e) => debug!("veth name {peer_name} taken, retrying"),
            Err(e) => return Err(e).context(format!("failed to create veth {if_name}")),
        }
    }

    bail!("failed to find a free veth name after {NAME_ATTEMPTS} attempts")
}

/// The route the kernel adds for an address with a network prefix.
fn subnet_route(oif_index: i32, address: &IpNet) -> Option<Routing> {
    if address.prefix_len() >= address.max_prefix_len() {
        return None;
    }

    Some(Routing {
        oif_index,
        dst: Some(address.trunc()),
        ..Default::default()
    })
}

/// Builds the container end of the veth pair inside `netns`.
///
/// Pod addresses are moved off their subnet route onto host routes towards
/// `host_addrs`, with the first host address as default gateway.
pub fn setup_container_veth(
    netns: &NetNs,
    if_name: &str,
    mtu: u32,
    host_addrs: &[Address],
    ips: &[IpConfig],
) -> Result<ContainerVeth> {
    let gw: IpAddr = host_addrs
        .first()
        .map(|addr| addr.ip.addr())
        .context("no host address to route through")?;

    netns.run(|host_ns| {
        let mut netlink = Netlink::new();

        match netlink.link_get(&LinkAttrs::new(if_name)) {
            Ok(_) => bail!("container veth name {if_name:?} already exists"),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(e),
        }

        let host_veth_name = create_veth(&mut netlink, if_name, mtu, host_ns)?;

        let link = netlink
            .link_get(&LinkAttrs::new(if_name))
            .with_context(|| format!("failed to lookup {if_name}"))?;
        netlink.link_up(&link)?;
        let attrs = link.attrs().clone();

        for ip in ips {
            let addr = Address {
                ip: ip.address,
                ..Default::default()
            };
            netlink
                .addr_add(&link, &addr)
                .with_context(|| format!("failed to add IP addr {} to {if_name}", ip.address))?;

            if let Some(route) = subnet_route(attrs.index, &ip.address) {
                netlink
                    .route_del(&route)
                    .with_context(|| format!("failed to delete subnet route {}", ip.address.trunc()))?;
            }
        }

        for addr in host_addrs {
            let dst = IpNet::from(addr.ip.addr());
            netlink
                .route_add(&Routing {
                    oif_index: attrs.index,
                    dst: Some(dst),
                    scope: libc::RT_SCOPE_LINK,
                    ..Default::default()
                })
                .with_context(|| format!("failed to add host route dst {dst}"))?;
        }

        netlink
            .route_add(&Routing {
                oif_index: attrs.index,
                gw: Some(gw),
                ..Default::default()
            })
            .with_context(|| format!("failed to add default route via {gw}"))?;

        for ip in ips {
            if let IpAddr::V4(v4) = ip.address.addr() {
                announce(v4, &attrs);
            }
        }

        info!("container veth {if_name} paired with {host_veth_name}");
        Ok(ContainerVeth {
            host_veth_name,
            container: Interface::new(if_name, attrs.mac(), &netns.path().display().to_string()),
        })
    })
}

use anyhow::Result;
use ptproute_netlink::{
    types::{
        addr::AddrFamily,
        link::{Link, LinkAttrs},
    },
    Netlink,
};
use tracing::debug;

use crate::{error::PluginError, result::CniResult, routing::main_table};

/// Name of the interface carrying the IPv4 default route.
pub fn default_route_interface(netlink: &mut Netlink) -> Result<String> {
    let route = netlink
        .route_list_filtered(AddrFamily::V4, main_table())?
        .into_iter()
        .find(|route| route.dst.is_none() && route.oif_index > 0)
        .ok_or_else(|| PluginError::InvalidConfig("no IPv4 default route found".into()))?;

    let link = netlink.link_get_by_index(route.oif_index).map_err(|e| {
        PluginError::InvalidConfig(format!("no link with index {}: {e:#}", route.oif_index))
    })?;

    Ok(link.attrs().name.clone())
}

/// `configured`, or the default route's interface when empty.
pub fn resolve_host_interface(netlink: &mut Netlink, configured: &str) -> Result<String> {
    if !configured.is_empty() {
        return Ok(configured.to_string());
    }

    let name = default_route_interface(netlink)?;
    debug!("using default route interface {name} as host interface");
    Ok(name)
}

/// `configured`, else the MTU of the first prev-result interface, else the
/// host interface's.
pub fn resolve_mtu(
    netlink: &mut Netlink,
    configured: u32,
    prev: &CniResult,
    host_interface: &str,
) -> Result<u32> {
    if configured > 0 {
        return Ok(configured);
    }

    let name = prev
        .interfaces
        .first()
        .map(|iface| iface.name.as_str())
        .unwrap_or(host_interface);

    let link = netlink.link_get(&LinkAttrs::new(name)).map_err(|e| {
        PluginError::InvalidConfig(format!("failed to lookup {name:?} for its MTU: {e:#}"))
    })?;

    Ok(link.attrs().mtu)
}

#[cfg(test)]
mod tests {
    use ptproute_netlink::{
        test_setup,
        types::{addr::Address, link::Kind, routing::Routing},
    };

    use super::*;
    use crate::{error::code_of, interface::Interface};

    #[test]
    fn test_resolves_from_default_route() {
        test_setup!();
        let mut netlink = Netlink::new();

        let err = resolve_host_interface(&mut netlink, "").unwrap_err();
        assert_eq!(code_of(&err), 7);

        let mut attrs = LinkAttrs::new("uplink0");
        attrs.mtu = 9001;
        netlink.link_add(&Kind::Dummy(attrs)).unwrap();
        let link = netlink.link_get(&LinkAttrs::new("uplink0")).unwrap();
        netlink.link_up(&link).unwrap();
        netlink
            .addr_add(
                &link,
                &Address {
                    ip: "192.168.50.2/24".parse().unwrap(),
                    ..Default::default()
                },
            )
            .unwrap();
        netlink
            .route_add(&Routing {
                gw: Some("192.168.50.1".parse().unwrap()),
                oif_index: link.attrs().index,
                ..Default::default()
            })
            .unwrap();

        assert_eq!(resolve_host_interface(&mut netlink, "").unwrap(), "uplink0");
        assert_eq!(resolve_host_interface(&mut netlink, "ens5").unwrap(), "ens5");

        let prev = CniResult::default();
        assert_eq!(resolve_mtu(&mut netlink, 0, &prev, "uplink0").unwrap(), 9001);
        assert_eq!(resolve_mtu(&mut netlink, 1400, &prev, "uplink0").unwrap(), 1400);

        let prev = CniResult {
            interfaces: vec![Interface::new("missing0", String::new(), "")],
            ..Default::default()
        };
        let err = resolve_mtu(&mut netlink, 0, &prev, "uplink0").unwrap_err();
        assert_eq!(code_of(&err), 7);
    }
}

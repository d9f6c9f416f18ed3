use std::net::IpAddr;

use anyhow::Context;
use async_trait::async_trait;
use ptproute_config::NetConf;
use ptproute_netlink::{
    types::{
        addr::AddrFamily,
        link::{Link, LinkAttrs},
    },
    Netlink,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    args::CmdArgs,
    error::PluginError,
    firewall::{self, Firewall, Iptables, Protocol},
    netns::NetNs,
    nodeport, resolve,
    result::CniResult,
    routing, sysctls, veth,
};

use super::{load_conf, CniCommand};

pub struct AddCommand;

#[async_trait(?Send)]
impl CniCommand for AddCommand {
    async fn run(&self, args: &CmdArgs, stdin: &[u8]) -> anyhow::Result<()> {
        let (conf, _guard) = load_conf(stdin)?;
        let result = Self::execute(args, &conf).await?;

        println!("{}", serde_json::to_string(&result)?);
        Ok(())
    }
}

impl AddCommand {
    pub async fn execute(args: &CmdArgs, conf: &NetConf) -> anyhow::Result<Value> {
        Self::execute_with(args, conf, Iptables::new).await
    }

    /// ADD with the firewall for each protocol supplied by `new_firewall`.
    pub async fn execute_with<F: Firewall>(
        args: &CmdArgs,
        conf: &NetConf,
        new_firewall: impl Fn(Protocol) -> F,
    ) -> anyhow::Result<Value> {
        let prev_value = conf
            .prev_result
            .clone()
            .ok_or_else(|| PluginError::InvalidConfig("must be called as chained plugin".into()))?;
        let mut prev = CniResult::parse(&conf.cni_version, prev_value)
            .context("could not parse prevResult")?;

        let container_ips = prev.container_ips(&conf.cni_version, &args.if_name);
        if container_ips.is_empty() {
            return Err(PluginError::InvalidConfig("got no container IPs".into()).into());
        }

        let mut netlink = Netlink::new();
        let host_if = resolve::resolve_host_interface(&mut netlink, &conf.host_interface)?;
        let mtu = resolve::resolve_mtu(&mut netlink, conf.mtu, &prev, &host_if)?;

        // The IPAM step's interface carries pod egress.
        let uplink = prev
            .interfaces
            .first()
            .map(|iface| iface.name.clone())
            .unwrap_or_else(|| host_if.clone());

        let gw: IpAddr = prev
            .routes
            .first()
            .and_then(|route| route.gw)
            .ok_or_else(|| PluginError::InvalidConfig("prevResult has no route gateway".into()))?;

        let host_link = netlink
            .link_get(&LinkAttrs::new(&host_if))
            .map_err(|e| PluginError::InvalidConfig(format!("failed to lookup {host_if:?}: {e:#}")))?;
        let host_addrs: Vec<_> = netlink
            .addr_list(&host_link, AddrFamily::All)?
            .into_iter()
            .filter(|addr| addr.scope == libc::RT_SCOPE_UNIVERSE)
            .collect();
        if host_addrs.is_empty() {
            return Err(PluginError::InvalidConfig(format!(
                "failed to get host IP addresses for {host_if:?}"
            ))
            .into());
        }

        let uplink_index = netlink
            .link_get(&LinkAttrs::new(&uplink))
            .map_err(|e| PluginError::InvalidConfig(format!("failed to lookup {uplink:?}: {e:#}")))?
            .attrs()
            .index;

        debug!("host interface {host_if}, uplink {uplink}, mtu {mtu}, gateway {gw}");

        let netns = NetNs::open(&args.netns).map_err(|e| PluginError::InvalidConfig(format!("{e:#}")))?;
        let veth = veth::setup_container_veth(&netns, &args.if_name, mtu, &host_addrs, &prev.ips)?;

        let host = routing::setup_host_veth(
            &mut netlink,
            &veth.host_veth_name,
            &host_addrs,
            &prev.ips,
            uplink_index,
            gw,
            conf.route_table_start,
            &mut rand::thread_rng(),
        )
        .await?;

        if conf.ip_masq {
            let v4 = container_ips.iter().any(|ip| ip.is_v4());
            let v6 = container_ips.iter().any(|ip| !ip.is_v4());
            sysctls::enable_forwarding(v4, v6)?;

            let chain = firewall::format_chain_name(&conf.name, &args.container_id);
            let comment = firewall::format_comment(&conf.name, &args.container_id);
            for ip in &container_ips {
                let fw = new_firewall(Protocol::from(&ip.address.addr()));
                firewall::setup_ip_masq(&fw, &ip.host_net(), &host_if, &chain, &comment)?;
            }
        }

        nodeport::setup_node_port_rule(
            &new_firewall(Protocol::V4),
            &mut netlink,
            &host_if,
            &conf.node_ports,
            conf.node_port_mark,
        )?;

        prev.interfaces = vec![host, veth.container];
        for ip in prev.ips.iter_mut() {
            ip.interface = Some(1);
        }

        info!("attached {} in {}", args.if_name, args.netns);
        Ok(prev.to_value(&conf.cni_version)?)
    }
}

#[cfg(test)]
mod tests {
    use ptproute_netlink::{
        test_setup,
        types::{addr::Address, link::Kind},
    };
    use serde_json::json;

    use super::*;
    use crate::{error::code_of, firewall::memory::MemoryFirewall, netns::spawn_netns};

    #[tokio::test]
    async fn test_missing_uplink_fails_before_wiring() {
        test_setup!();
        let mut netlink = Netlink::new();
        netlink.link_add(&Kind::Dummy(LinkAttrs::new("uplink0"))).unwrap();
        let link = netlink.link_get(&LinkAttrs::new("uplink0")).unwrap();
        netlink
            .addr_add(
                &link,
                &Address {
                    ip: "192.168.50.2/24".parse().unwrap(),
                    ..Default::default()
                },
            )
            .unwrap();
        let pod = spawn_netns();

        let stdin = json!({
            "cniVersion": "0.4.0",
            "name": "ptp",
            "hostInterface": "uplink0",
            "mtu": 1400,
            "prevResult": {
                "interfaces": [{"name": "eni-missing"}],
                "ips": [{"version": "4", "address": "10.0.1.5/32"}],
                "routes": [{"dst": "0.0.0.0/0", "gw": "192.168.50.1"}]
            }
        });
        let conf = NetConf::parse(stdin.to_string().as_bytes()).unwrap();
        let args = CmdArgs {
            command: "ADD".into(),
            container_id: "ctr1".into(),
            netns: pod.path().display().to_string(),
            if_name: "eth0".into(),
            ..Default::default()
        };

        let fw = MemoryFirewall::with_builtin();
        let err = AddCommand::execute_with(&args, &conf, |_| &fw)
            .await
            .unwrap_err();
        assert_eq!(code_of(&err), 7);

        let in_pod = pod
            .run(|_| Ok(Netlink::new().link_get(&LinkAttrs::new("eth0")).is_ok()))
            .unwrap();
        assert!(!in_pod);
        assert!(netlink
            .rule_list(AddrFamily::V4)
            .unwrap()
            .iter()
            .all(|rule| rule.priority != Some(crate::MAIN_TABLE_RULE_PRIORITY)));
        assert!(fw.rules("mangle", "PREROUTING").is_empty());
    }
}

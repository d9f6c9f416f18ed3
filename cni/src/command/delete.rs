use async_trait::async_trait;
use ipnet::IpNet;
use ptproute_config::NetConf;
use ptproute_netlink::Netlink;
use tracing::info;

use crate::{
    args::CmdArgs,
    error::best_effort,
    firewall::{self, Firewall, Iptables, Protocol},
    netns::NetNs,
    teardown,
};

use super::{load_conf, CniCommand};

pub struct DeleteCommand;

#[async_trait(?Send)]
impl CniCommand for DeleteCommand {
    async fn run(&self, args: &CmdArgs, stdin: &[u8]) -> anyhow::Result<()> {
        let (conf, _guard) = load_conf(stdin)?;
        Self::execute(args, &conf)
    }
}

impl DeleteCommand {
    pub fn execute(args: &CmdArgs, conf: &NetConf) -> anyhow::Result<()> {
        Self::execute_with(args, conf, Iptables::new)
    }

    pub fn execute_with<F: Firewall>(
        args: &CmdArgs,
        conf: &NetConf,
        new_firewall: impl Fn(Protocol) -> F,
    ) -> anyhow::Result<()> {
        if args.netns.is_empty() {
            return Ok(());
        }

        // DEL may run again after a partial cleanup, so a missing namespace
        // or interface leaves nothing to discover.
        let discovered = best_effort(
            "container interface discovery",
            NetNs::open(&args.netns).and_then(|netns| teardown::discover(&netns, &args.if_name)),
        )
        .unwrap_or_default();

        if conf.ip_masq {
            let chain = firewall::format_chain_name(&conf.name, &args.container_id);
            let comment = firewall::format_comment(&conf.name, &args.container_id);
            for addr in &discovered.addrs {
                let fw = new_firewall(Protocol::from(&addr.addr()));
                firewall::teardown_ip_masq(&fw, &IpNet::from(addr.addr()), &chain, &comment);
            }
        }

        let mut netlink = Netlink::new();
        for addr in &discovered.addrs {
            teardown::remove_policy(&mut netlink, addr.addr())?;
        }

        if let Some(index) = discovered.peer_index {
            best_effort("veth removal", teardown::delete_peer(&mut netlink, index));
        }

        info!("detached {} from {}", args.if_name, args.netns);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use ptproute_netlink::{
        is_not_found, test_setup,
        types::{
            addr::{AddrFamily, Address},
            link::{Kind, Link, LinkAttrs},
            routing::Routing,
        },
    };
    use serde_json::json;

    use super::*;
    use crate::{
        command::add::AddCommand, firewall::memory::MemoryFirewall, netns::spawn_netns,
        teardown::rule_match,
        MAIN_TABLE_RULE_PRIORITY, POD_RULE_PRIORITY,
    };

    fn uplink(netlink: &mut Netlink) {
        netlink.link_add(&Kind::Dummy(LinkAttrs::new("uplink0"))).unwrap();
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
    }

    #[test]
    fn test_delete_without_netns() {
        let conf = NetConf::parse(br#"{"cniVersion":"0.4.0","name":"ptp"}"#).unwrap();
        let args = CmdArgs {
            command: "DEL".into(),
            container_id: "ctr1".into(),
            if_name: "eth0".into(),
            ..Default::default()
        };

        DeleteCommand::execute(&args, &conf).unwrap();
    }

    #[tokio::test]
    async fn test_add_then_delete_twice() {
        test_setup!();
        let fw = MemoryFirewall::with_builtin();

        let mut netlink = Netlink::new();
        uplink(&mut netlink);
        let pod = spawn_netns();

        let stdin = json!({
            "cniVersion": "0.4.0",
            "name": "ptp",
            "type": "ptproute",
            "hostInterface": "uplink0",
            "ipMasq": true,
            "prevResult": {
                "cniVersion": "0.4.0",
                "interfaces": [{"name": "uplink0"}],
                "ips": [{"version": "4", "address": "10.0.1.5/32", "interface": -1}],
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

        let result = AddCommand::execute_with(&args, &conf, |_| &fw).await.unwrap();
        assert_eq!(result["interfaces"][1]["name"], "eth0");
        assert_eq!(result["ips"][0]["interface"], 1);
        let host_veth = result["interfaces"][0]["name"].as_str().unwrap().to_string();

        let ip: IpAddr = "10.0.1.5".parse().unwrap();
        let rules: Vec<_> = netlink
            .rule_list(AddrFamily::V4)
            .unwrap()
            .into_iter()
            .filter(|rule| rule_match(rule, ip).is_some())
            .collect();
        assert_eq!(rules.len(), 2);

        let src = rules
            .iter()
            .find(|rule| rule.priority == Some(POD_RULE_PRIORITY))
            .unwrap();
        assert!(src.table >= 256);
        assert!(rules
            .iter()
            .any(|rule| rule.priority == Some(MAIN_TABLE_RULE_PRIORITY) && rule.table == 254));

        let table_routes = netlink.route_list_filtered(AddrFamily::V4, src.table).unwrap();
        assert_eq!(table_routes.len(), 2);

        let chain = firewall::format_chain_name("ptp", "ctr1");
        assert_eq!(fw.rules("nat", &chain).len(), 2);
        assert_eq!(fw.rules("nat", "POSTROUTING").len(), 1);
        let marks = fw.rules("mangle", "PREROUTING");
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[0][..2], ["-i", "uplink0"]);

        let args = CmdArgs {
            command: "DEL".into(),
            ..args
        };
        DeleteCommand::execute_with(&args, &conf, |_| &fw).unwrap();
        DeleteCommand::execute_with(&args, &conf, |_| &fw).unwrap();

        assert!(fw.rules("nat", "POSTROUTING").is_empty());
        assert!(!fw.chain_exists("nat", &chain).unwrap());

        assert!(netlink
            .rule_list(AddrFamily::V4)
            .unwrap()
            .iter()
            .all(|rule| rule_match(rule, ip).is_none()));
        assert!(netlink
            .route_list_filtered(AddrFamily::V4, src.table)
            .unwrap()
            .is_empty());

        let err = netlink.link_get(&LinkAttrs::new(&host_veth)).err().unwrap();
        assert!(is_not_found(&err));
    }
}

use anyhow::{Context, Result};
use ptproute_netlink::{
    types::{addr::AddrFamily, rule::Rule},
    Netlink,
};
use tracing::debug;

use crate::{firewall::Firewall, routing::main_table, sysctls, MAIN_TABLE_RULE_PRIORITY};

const COMMENT: &str = "NodePort Mark";

/// `(chain, rule)` pairs marking nodeport connections arriving on `if_name`.
fn mark_rules(if_name: &str, ports: &str, mark: u32) -> Vec<Vec<String>> {
    let mark = mark.to_string();
    let tag = ["-m", "comment", "--comment", COMMENT];

    let mut rules: Vec<Vec<&str>> = ["tcp", "udp"]
        .into_iter()
        .map(|proto| {
            vec![
                "-i",
                if_name,
                "-p",
                proto,
                "--dport",
                ports,
                "-j",
                "CONNMARK",
                "--set-mark",
                mark.as_str(),
            ]
        })
        .collect();
    rules.push(vec!["-i", "veth+", "-j", "CONNMARK", "--restore-mark"]);

    rules
        .into_iter()
        .map(|rule| rule.into_iter().chain(tag).map(str::to_string).collect::<Vec<_>>())
        .collect()
}

pub fn ensure_mark_rules(fw: &impl Firewall, if_name: &str, ports: &str, mark: u32) -> Result<()> {
    for rule in mark_rules(if_name, ports, mark) {
        let rule: Vec<&str> = rule.iter().map(String::as_str).collect();
        fw.append_unique("mangle", "PREROUTING", &rule)
            .context("failed to add nodeport mark rule")?;
    }
    Ok(())
}

fn is_mark_rule(rule: &Rule, mark: u32) -> bool {
    rule.table == main_table()
        && rule.mark == Some(mark)
        && rule.priority == Some(MAIN_TABLE_RULE_PRIORITY)
}

/// Sends marked traffic through the main table, once.
pub fn ensure_mark_policy(netlink: &mut Netlink, mark: u32) -> Result<()> {
    let rules = netlink
        .rule_list(AddrFamily::V4)
        .context("unable to retrieve IP rules")?;

    if rules.iter().any(|rule| is_mark_rule(rule, mark)) {
        debug!("nodeport mark rule for {mark:#x} already present");
        return Ok(());
    }

    let rule = Rule {
        mark: Some(mark),
        priority: Some(MAIN_TABLE_RULE_PRIORITY),
        table: main_table(),
        ..Default::default()
    };
    netlink
        .rule_add(&rule)
        .with_context(|| format!("failed to add policy rule for mark {mark:#x}"))
}

pub fn setup_node_port_rule(
    fw: &impl Firewall,
    netlink: &mut Netlink,
    if_name: &str,
    ports: &str,
    mark: u32,
) -> Result<()> {
    ensure_mark_rules(fw, if_name, ports, mark)?;

    sysctls::set_rp_filter(if_name, "2")
        .with_context(|| format!("failed to set RP filter to loose for interface {if_name:?}"))?;

    ensure_mark_policy(netlink, mark)
}

#[cfg(test)]
mod tests {
    use ptproute_netlink::test_setup;

    use super::*;
    use crate::firewall::memory::MemoryFirewall;

    #[test]
    fn test_mark_rules_are_idempotent() {
        let fw = MemoryFirewall::with_builtin();

        ensure_mark_rules(&fw, "eth0", "30000:32767", 0x2000).unwrap();
        ensure_mark_rules(&fw, "eth0", "30000:32767", 0x2000).unwrap();

        let rules = fw.rules("mangle", "PREROUTING");
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0][..6], ["-i", "eth0", "-p", "tcp", "--dport", "30000:32767"]);
        assert_eq!(rules[1][3], "udp");
        assert_eq!(rules[0][9], "8192");
        assert_eq!(rules[2][..5], ["-i", "veth+", "-j", "CONNMARK", "--restore-mark"]);
        assert!(rules.iter().all(|r| r.last().map(String::as_str) == Some(COMMENT)));
    }

    #[test]
    fn test_firewall_failure_propagates() {
        let fw = MemoryFirewall::with_builtin();
        *fw.fail.borrow_mut() = true;

        assert!(ensure_mark_rules(&fw, "eth0", "30000:32767", 0x2000).is_err());
    }

    #[test]
    fn test_mark_policy_added_once() {
        test_setup!();
        let mut netlink = Netlink::new();

        ensure_mark_policy(&mut netlink, 0x2000).unwrap();
        ensure_mark_policy(&mut netlink, 0x2000).unwrap();

        let count = netlink
            .rule_list(AddrFamily::V4)
            .unwrap()
            .iter()
            .filter(|rule| is_mark_rule(rule, 0x2000))
            .count();
        assert_eq!(count, 1);
    }
}

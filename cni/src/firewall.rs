use std::{env, net::IpAddr, process::Command};

use anyhow::{bail, Context, Result};
use ipnet::IpNet;
use sha2::{Digest, Sha512};
use tracing::debug;

use crate::error::best_effort;

const CHAIN_PREFIX: &str = "CNI-";
const MAX_CHAIN_LEN: usize = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    V4,
    V6,
}

impl From<&IpAddr> for Protocol {
    fn from(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Protocol::V4,
            IpAddr::V6(_) => Protocol::V6,
        }
    }
}

impl Protocol {
    fn multicast(self) -> &'static str {
        match self {
            Protocol::V4 => "224.0.0.0/4",
            Protocol::V6 => "ff00::/8",
        }
    }
}

pub trait Firewall {
    fn exists(&self, table: &str, chain: &str, rule: &[&str]) -> Result<bool>;
    fn append(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()>;
    fn delete(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()>;
    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool>;
    fn new_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn clear_chain(&self, table: &str, chain: &str) -> Result<()>;
    fn delete_chain(&self, table: &str, chain: &str) -> Result<()>;

    fn append_unique(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
        if self.exists(table, chain, rule)? {
            return Ok(());
        }
        self.append(table, chain, rule)
    }
}

/// `iptables`/`ip6tables` driven through the command line.
pub struct Iptables {
    binary: String,
}

impl Iptables {
    pub fn new(protocol: Protocol) -> Self {
        let (var, default) = match protocol {
            Protocol::V4 => ("PTPROUTE_IPTABLES", "iptables"),
            Protocol::V6 => ("PTPROUTE_IP6TABLES", "ip6tables"),
        };

        Self {
            binary: env::var(var).unwrap_or_else(|_| default.to_string()),
        }
    }

    /// Exit status of the command; non-zero codes other than 1 are errors.
    fn run(&self, args: &[&str]) -> Result<bool> {
        debug!("running command: {} -w {}", self.binary, args.join(" "));

        let out = Command::new(&self.binary)
            .arg("-w")
            .args(args)
            .output()
            .with_context(|| format!("failed to run {}", self.binary))?;

        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => bail!(
                "{} {} failed: {}",
                self.binary,
                args.join(" "),
                String::from_utf8_lossy(&out.stderr).trim()
            ),
        }
    }

    fn must(&self, args: &[&str]) -> Result<()> {
        if !self.run(args)? {
            bail!("{} {} failed", self.binary, args.join(" "));
        }
        Ok(())
    }
}

fn with_rule<'a>(head: [&'a str; 4], rule: &[&'a str]) -> Vec<&'a str> {
    head.into_iter().chain(rule.iter().copied()).collect()
}

impl Firewall for Iptables {
    fn exists(&self, table: &str, chain: &str, rule: &[&str]) -> Result<bool> {
        self.run(&with_rule(["-t", table, "-C", chain], rule))
    }

    fn append(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
        self.must(&with_rule(["-t", table, "-A", chain], rule))
    }

    fn delete(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
        self.must(&with_rule(["-t", table, "-D", chain], rule))
    }

    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        self.run(&["-t", table, "-S", chain])
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.must(&["-t", table, "-N", chain])
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.must(&["-t", table, "-F", chain])
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        self.must(&["-t", table, "-X", chain])
    }
}

impl<F: Firewall + ?Sized> Firewall for &F {
    fn exists(&self, table: &str, chain: &str, rule: &[&str]) -> Result<bool> {
        (**self).exists(table, chain, rule)
    }

    fn append(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
        (**self).append(table, chain, rule)
    }

    fn delete(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
        (**self).delete(table, chain, rule)
    }

    fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
        (**self).chain_exists(table, chain)
    }

    fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
        (**self).new_chain(table, chain)
    }

    fn clear_chain(&self, table: &str, chain: &str) -> Result<()> {
        (**self).clear_chain(table, chain)
    }

    fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
        (**self).delete_chain(table, chain)
    }
}

pub fn format_chain_name(name: &str, container_id: &str) -> String {
    let digest = Sha512::digest(format!("{name}{container_id}"));
    let mut chain = format!("{CHAIN_PREFIX}{}", hex::encode(digest));
    chain.truncate(MAX_CHAIN_LEN);
    chain
}

pub fn format_comment(name: &str, container_id: &str) -> String {
    format!("name: \"{name}\" id: \"{container_id}\"")
}

/// Masquerades traffic from `ip` leaving through `host_if`.
pub fn setup_ip_masq(
    fw: &impl Firewall,
    ip: &IpNet,
    host_if: &str,
    chain: &str,
    comment: &str,
) -> Result<()> {
    let protocol = Protocol::from(&ip.addr());
    let dst = ip.to_string();
    let src = ip.addr().to_string();
    let tag = ["-m", "comment", "--comment", comment];

    if !fw.chain_exists("nat", chain)? {
        fw.new_chain("nat", chain)?;
    }

    let mut accept = vec!["-d", dst.as_str(), "-j", "ACCEPT"];
    accept.extend(tag);
    fw.append_unique("nat", chain, &accept)?;

    let mut masq = vec!["!", "-d", protocol.multicast()];
    if !host_if.is_empty() {
        masq.extend(["-o", host_if]);
    }
    masq.extend(["-j", "MASQUERADE"]);
    masq.extend(tag);
    fw.append_unique("nat", chain, &masq)?;

    fw.append_unique("nat", "POSTROUTING", &jump_rule(&src, chain, comment))
}

fn jump_rule<'a>(src: &'a str, chain: &'a str, comment: &'a str) -> Vec<&'a str> {
    vec!["-s", src, "-j", chain, "-m", "comment", "--comment", comment]
}

/// Undoes [`setup_ip_masq`]; every step runs even if an earlier one fails.
pub fn teardown_ip_masq(fw: &impl Firewall, ip: &IpNet, chain: &str, comment: &str) {
    let src = ip.addr().to_string();

    best_effort(
        "masquerade jump removal",
        fw.delete("nat", "POSTROUTING", &jump_rule(&src, chain, comment)),
    );
    best_effort("masquerade chain flush", fw.clear_chain("nat", chain));
    best_effort("masquerade chain removal", fw.delete_chain("nat", chain));
}

#[cfg(test)]
pub(crate) mod memory {
    use std::{cell::RefCell, collections::BTreeMap};

    use anyhow::bail;

    use super::*;

    /// In-memory tables keyed by `(table, chain)`.
    #[derive(Default)]
    pub struct MemoryFirewall {
        pub chains: RefCell<BTreeMap<(String, String), Vec<Vec<String>>>>,
        pub fail: RefCell<bool>,
    }

    impl MemoryFirewall {
        pub fn with_builtin() -> Self {
            let fw = Self::default();
            for (table, chain) in [("nat", "POSTROUTING"), ("mangle", "PREROUTING")] {
                fw.chains
                    .borrow_mut()
                    .insert((table.to_string(), chain.to_string()), Vec::new());
            }
            fw
        }

        pub fn rules(&self, table: &str, chain: &str) -> Vec<Vec<String>> {
            self.chains
                .borrow()
                .get(&(table.to_string(), chain.to_string()))
                .cloned()
                .unwrap_or_default()
        }

        fn check(&self) -> Result<()> {
            if *self.fail.borrow() {
                bail!("iptables: resource temporarily unavailable");
            }
            Ok(())
        }
    }

    fn key(table: &str, chain: &str) -> (String, String) {
        (table.to_string(), chain.to_string())
    }

    fn owned(rule: &[&str]) -> Vec<String> {
        rule.iter().map(|s| s.to_string()).collect()
    }

    impl Firewall for MemoryFirewall {
        fn exists(&self, table: &str, chain: &str, rule: &[&str]) -> Result<bool> {
            self.check()?;
            Ok(self.rules(table, chain).contains(&owned(rule)))
        }

        fn append(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
            self.check()?;
            match self.chains.borrow_mut().get_mut(&key(table, chain)) {
                Some(rules) => rules.push(owned(rule)),
                None => bail!("no chain {chain} in {table}"),
            }
            Ok(())
        }

        fn delete(&self, table: &str, chain: &str, rule: &[&str]) -> Result<()> {
            self.check()?;
            let mut chains = self.chains.borrow_mut();
            let rules = chains
                .get_mut(&key(table, chain))
                .ok_or_else(|| anyhow::anyhow!("no chain {chain} in {table}"))?;
            let pos = rules
                .iter()
                .position(|r| r == &owned(rule))
                .ok_or_else(|| anyhow::anyhow!("bad rule"))?;
            rules.remove(pos);
            Ok(())
        }

        fn chain_exists(&self, table: &str, chain: &str) -> Result<bool> {
            self.check()?;
            Ok(self.chains.borrow().contains_key(&key(table, chain)))
        }

        fn new_chain(&self, table: &str, chain: &str) -> Result<()> {
            self.check()?;
            self.chains.borrow_mut().insert(key(table, chain), Vec::new());
            Ok(())
        }

        fn clear_chain(&self, table: &str, chain: &str) -> Result<()> {
            self.check()?;
            if let Some(rules) = self.chains.borrow_mut().get_mut(&key(table, chain)) {
                rules.clear();
            }
            Ok(())
        }

        fn delete_chain(&self, table: &str, chain: &str) -> Result<()> {
            self.check()?;
            self.chains.borrow_mut().remove(&key(table, chain));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{memory::MemoryFirewall, *};

    #[test]
    fn test_chain_name_and_comment() {
        let chain = format_chain_name("ptp", "abc123");
        assert_eq!(chain.len(), 28);
        assert!(chain.starts_with("CNI-"));
        assert_eq!(chain, format_chain_name("ptp", "abc123"));
        assert_ne!(chain, format_chain_name("ptp", "abc124"));

        assert_eq!(format_comment("ptp", "abc123"), r#"name: "ptp" id: "abc123""#);
    }

    #[test]
    fn test_masq_setup_and_teardown() {
        let fw = MemoryFirewall::with_builtin();
        let ip: IpNet = "10.0.1.5/32".parse().unwrap();
        let chain = format_chain_name("ptp", "abc");
        let comment = format_comment("ptp", "abc");

        setup_ip_masq(&fw, &ip, "eth0", &chain, &comment).unwrap();
        setup_ip_masq(&fw, &ip, "eth0", &chain, &comment).unwrap();

        let rules = fw.rules("nat", &chain);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0][..4], ["-d", "10.0.1.5/32", "-j", "ACCEPT"]);
        assert_eq!(
            rules[1][..7],
            ["!", "-d", "224.0.0.0/4", "-o", "eth0", "-j", "MASQUERADE"]
        );

        let jumps = fw.rules("nat", "POSTROUTING");
        assert_eq!(jumps.len(), 1);
        assert_eq!(jumps[0][..4], ["-s", "10.0.1.5", "-j", chain.as_str()]);

        teardown_ip_masq(&fw, &ip, &chain, &comment);
        assert!(fw.rules("nat", "POSTROUTING").is_empty());
        assert!(!fw.chain_exists("nat", &chain).unwrap());
    }

    #[test]
    fn test_teardown_never_fails() {
        let fw = MemoryFirewall::with_builtin();
        *fw.fail.borrow_mut() = true;

        let ip: IpNet = "fd00::5/128".parse().unwrap();
        teardown_ip_masq(&fw, &ip, "CNI-missing", "comment");
    }
}

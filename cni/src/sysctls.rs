use anyhow::{Context, Result};
use sysctl::Sysctl;
use tracing::debug;

pub fn set(name: &str, value: &str) -> Result<()> {
    debug!("sysctl {name}={value}");

    let ctl = sysctl::Ctl::new(name).with_context(|| format!("no sysctl {name}"))?;
    ctl.set_value_string(value)
        .with_context(|| format!("failed to set {name}={value}"))?;

    Ok(())
}

pub fn enable_forwarding(v4: bool, v6: bool) -> Result<()> {
    if v4 {
        set("net.ipv4.ip_forward", "1")?;
    }
    if v6 {
        set("net.ipv6.conf.all.forwarding", "1")?;
    }
    Ok(())
}

/// `2` is loose mode: the source only has to be reachable via some interface.
pub fn set_rp_filter(if_name: &str, mode: &str) -> Result<()> {
    set(&format!("net.ipv4.conf.{if_name}.rp_filter"), mode)
}

use anyhow::Result;
use derive_builder::Builder;
use ipnet::IpNet;

use super::{
    message::{Attribute, RouteAttrs, RuleMessage},
    vec_to_addr,
};

pub const FRA_DST: u16 = 1;
pub const FRA_SRC: u16 = 2;
pub const FRA_IIFNAME: u16 = 3;
pub const FRA_PRIORITY: u16 = 6;
pub const FRA_FWMARK: u16 = 10;
pub const FRA_TABLE: u16 = 15;
pub const FRA_FWMASK: u16 = 16;
pub const FRA_OIFNAME: u16 = 17;

pub const FR_ACT_TO_TBL: u8 = 1;

pub const RTM_NEWRULE: u16 = 32;
pub const RTM_DELRULE: u16 = 33;
pub const RTM_GETRULE: u16 = 34;

pub enum RuleCmd {
    Add,
    Delete,
}

/// A policy routing rule. `None` fields are left unmatched.
#[derive(Default, Builder, Debug, Clone, PartialEq)]
#[builder(default)]
pub struct Rule {
    pub family: u8,
    pub priority: Option<u32>,
    pub table: u32,
    pub mark: Option<u32>,
    pub mask: Option<u32>,
    pub tos: u8,
    pub action: u8,
    pub src: Option<IpNet>,
    pub dst: Option<IpNet>,
    pub iif_name: Option<String>,
    pub oif_name: Option<String>,
}

impl TryFrom<&[u8]> for Rule {
    type Error = anyhow::Error;

    fn try_from(buf: &[u8]) -> Result<Self> {
        let msg: RuleMessage = bincode::deserialize(buf)?;
        let attrs = RouteAttrs::try_from(&buf[msg.len()..])?;

        let mut rule = Self {
            family: msg.family,
            table: msg.table as u32,
            tos: msg.tos,
            action: msg.action,
            ..Default::default()
        };

        for attr in attrs {
            match attr.rta_type {
                FRA_SRC => rule.src = Some(IpNet::new(vec_to_addr(&attr.payload)?, msg.src_len)?),
                FRA_DST => rule.dst = Some(IpNet::new(vec_to_addr(&attr.payload)?, msg.dst_len)?),
                FRA_PRIORITY => rule.priority = Some(attr.payload.to_u32()?),
                FRA_FWMARK => rule.mark = Some(attr.payload.to_u32()?),
                FRA_FWMASK => rule.mask = Some(attr.payload.to_u32()?),
                FRA_TABLE => rule.table = attr.payload.to_u32()?,
                FRA_IIFNAME => rule.iif_name = Some(attr.payload.to_c_string()?),
                FRA_OIFNAME => rule.oif_name = Some(attr.payload.to_c_string()?),
                _ => {}
            }
        }

        Ok(rule)
    }
}

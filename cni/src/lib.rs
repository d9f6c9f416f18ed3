pub mod args;
pub mod arp;
pub mod command;
pub mod error;
pub mod firewall;
pub mod interface;
pub mod ip;
pub mod netns;
pub mod nodeport;
pub mod resolve;
pub mod result;
pub mod route;
pub mod routing;
pub mod sysctls;
pub mod table;
pub mod teardown;
pub mod veth;

/// Priority of the source rules sending pod traffic into its own table.
pub const POD_RULE_PRIORITY: u32 = 1024;

/// Priority of the rules keeping pod-bound and nodeport traffic in the main
/// table. Must sort before [`POD_RULE_PRIORITY`].
pub const MAIN_TABLE_RULE_PRIORITY: u32 = 512;

use std::{
    io::Error,
    mem::size_of,
    net::Ipv4Addr,
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use anyhow::{bail, Context, Result};
use libc::{c_void, sockaddr, sockaddr_ll, socklen_t, AF_PACKET, ETH_P_ARP, SOCK_CLOEXEC, SOCK_RAW};
use tracing::debug;

const BROADCAST: [u8; 6] = [0xff; 6];
const ETH_P_IP: u16 = 0x0800;
const ARPHRD_ETHER: u16 = 1;
const ARPOP_REQUEST: u16 = 1;

pub const FRAME_LEN: usize = 42;

/// Ethernet frame for a gratuitous ARP request announcing `ip` at `mac`.
pub fn arp_frame(ip: Ipv4Addr, mac: [u8; 6]) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];

    frame[0..6].copy_from_slice(&BROADCAST);
    frame[6..12].copy_from_slice(&mac);
    frame[12..14].copy_from_slice(&(ETH_P_ARP as u16).to_be_bytes());

    frame[14..16].copy_from_slice(&ARPHRD_ETHER.to_be_bytes());
    frame[16..18].copy_from_slice(&ETH_P_IP.to_be_bytes());
    frame[18] = 6;
    frame[19] = 4;
    frame[20..22].copy_from_slice(&ARPOP_REQUEST.to_be_bytes());
    frame[22..28].copy_from_slice(&mac);
    frame[28..32].copy_from_slice(&ip.octets());
    frame[32..38].copy_from_slice(&BROADCAST);
    frame[38..42].copy_from_slice(&ip.octets());

    frame
}

pub fn parse_mac(hw_addr: &[u8]) -> Result<[u8; 6]> {
    hw_addr
        .try_into()
        .with_context(|| format!("not an ethernet address: {hw_addr:02x?}"))
}

/// Broadcasts a gratuitous ARP for `ip` out of `ifindex`.
pub fn announce(ip: Ipv4Addr, ifindex: i32, hw_addr: &[u8]) -> Result<()> {
    let mac = parse_mac(hw_addr)?;
    let frame = arp_frame(ip, mac);
    let proto = (ETH_P_ARP as u16).to_be();

    let fd = match unsafe { libc::socket(AF_PACKET, SOCK_RAW | SOCK_CLOEXEC, proto as i32) } {
        -1 => return Err(Error::last_os_error()).context("failed to open packet socket"),
        fd => unsafe { OwnedFd::from_raw_fd(fd) },
    };

    let mut addr: sockaddr_ll = unsafe { std::mem::zeroed() };
    addr.sll_family = AF_PACKET as u16;
    addr.sll_protocol = proto;
    addr.sll_ifindex = ifindex;
    addr.sll_halen = 6;
    addr.sll_addr[..6].copy_from_slice(&BROADCAST);

    let sent = unsafe {
        libc::sendto(
            fd.as_raw_fd(),
            frame.as_ptr() as *const c_void,
            frame.len(),
            0,
            &addr as *const sockaddr_ll as *const sockaddr,
            size_of::<sockaddr_ll>() as socklen_t,
        )
    };

    if sent == -1 {
        return Err(Error::last_os_error()).context("failed to send gratuitous arp");
    }
    if sent as usize != frame.len() {
        bail!("short write sending gratuitous arp: {sent} bytes");
    }

    debug!("announced {ip} on ifindex {ifindex}");
    Ok(())
}

use std::{
    io::{Error, Result},
    mem::{size_of, zeroed},
    os::fd::{AsRawFd, FromRawFd, OwnedFd},
};

use libc::{c_void, size_t, sockaddr, sockaddr_nl, socklen_t, AF_NETLINK, SOCK_CLOEXEC, SOCK_RAW};

use super::message::Messages;

const RECV_BUF_SIZE: usize = 65536;

pub struct Socket {
    fd: OwnedFd,
    sa: SocketAddr,
}

impl Socket {
    pub fn new(proto: i32, pid: u32, groups: u32) -> Result<Self> {
        match unsafe { libc::socket(AF_NETLINK, SOCK_RAW | SOCK_CLOEXEC, proto) } {
            -1 => Err(Error::last_os_error()),
            fd => {
                let fd = unsafe { OwnedFd::from_raw_fd(fd) };
                let s = Self {
                    fd,
                    sa: SocketAddr::new(pid, groups),
                };
                s.bind()?;
                s.set_ext_ack()?;
                Ok(s)
            }
        }
    }

    fn bind(&self) -> Result<()> {
        let (addr, addr_len) = self.sa.as_raw();

        match unsafe { libc::bind(self.fd.as_raw_fd(), addr, addr_len) } {
            -1 => Err(Error::last_os_error()),
            _ => Ok(()),
        }
    }

    // Extended acks carry the kernel's reason string after the errno.
    fn set_ext_ack(&self) -> Result<()> {
        let enable: libc::c_int = 1;

        match unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_NETLINK,
                libc::NETLINK_EXT_ACK,
                &enable as *const _ as *const c_void,
                size_of::<libc::c_int>() as socklen_t,
            )
        } {
            -1 => Err(Error::last_os_error()),
            _ => Ok(()),
        }
    }

    pub fn send(&self, buf: &[u8]) -> Result<()> {
        let (addr, addr_len) = self.sa.as_raw();

        match unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const c_void,
                buf.len() as size_t,
                0,
                addr,
                addr_len,
            )
        } {
            -1 => Err(Error::last_os_error()),
            _ => Ok(()),
        }
    }

    pub fn recv(&self) -> Result<(Messages, sockaddr_nl)> {
        let mut from: sockaddr_nl = unsafe { zeroed() };
        let mut from_len = size_of::<sockaddr_nl>() as socklen_t;
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        match unsafe {
            libc::recvfrom(
                self.fd.as_raw_fd(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len() as size_t,
                0,
                &mut from as *mut _ as *mut sockaddr,
                &mut from_len,
            )
        } {
            -1 => Err(Error::last_os_error()),
            ret => {
                let msgs = Messages::try_from(&buf[..ret as usize])
                    .map_err(|e| Error::new(std::io::ErrorKind::InvalidData, e))?;
                Ok((msgs, from))
            }
        }
    }

    pub fn pid(&self) -> Result<u32> {
        let mut rsa: sockaddr_nl = unsafe { zeroed() };
        let mut rsa_len = size_of::<sockaddr_nl>() as socklen_t;

        match unsafe {
            libc::getsockname(
                self.fd.as_raw_fd(),
                &mut rsa as *mut _ as *mut sockaddr,
                &mut rsa_len,
            )
        } {
            -1 => Err(Error::last_os_error()),
            _ => Ok(rsa.nl_pid),
        }
    }
}

struct SocketAddr(sockaddr_nl);

impl SocketAddr {
    fn new(pid: u32, groups: u32) -> Self {
        let mut addr: sockaddr_nl = unsafe { zeroed() };
        addr.nl_family = AF_NETLINK as u16;
        addr.nl_pid = pid;
        addr.nl_groups = groups;
        Self(addr)
    }

    fn as_raw(&self) -> (*const sockaddr, socklen_t) {
        (
            &self.0 as *const _ as *const sockaddr,
            size_of::<sockaddr_nl>() as socklen_t,
        )
    }
}

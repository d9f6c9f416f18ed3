use anyhow::{bail, Result};

use crate::{
    core::{
        message::{Message, NLMSG_HDRLEN},
        socket::Socket,
    },
    error::NetlinkError,
    types::message::RouteAttrs,
};

use super::{addr::AddrHandle, link::LinkHandle, routing::RouteHandle, rule::RuleHandle};

const PID_KERNEL: u32 = 0;

const NLMSG_DONE: u16 = 3;
const NLMSG_ERROR: u16 = 2;

const NLM_F_CAPPED: u16 = 0x100;
const NLM_F_ACK_TLVS: u16 = 0x200;
const NLMSGERR_ATTR_MSG: u16 = 1;

pub struct SocketHandle {
    pub socket: Socket,
    pub seq: u32,
}

impl SocketHandle {
    pub fn new(proto: i32) -> Result<Self> {
        Ok(Self {
            socket: Socket::new(proto, 0, 0)?,
            seq: 0,
        })
    }

    pub fn next_seq(&mut self) -> u32 {
        self.seq += 1;
        self.seq
    }

    pub fn handle_link(&mut self) -> LinkHandle<'_> {
        LinkHandle::from(self)
    }

    pub fn handle_addr(&mut self) -> AddrHandle<'_> {
        AddrHandle::from(self)
    }

    pub fn handle_route(&mut self) -> RouteHandle<'_> {
        RouteHandle::from(self)
    }

    pub fn handle_rule(&mut self) -> RuleHandle<'_> {
        RuleHandle::from(self)
    }

    pub fn request(&mut self, msg: &mut Message, res_type: u16) -> Result<Vec<Vec<u8>>> {
        let next_seq = self.next_seq();
        msg.header.nlmsg_seq = next_seq;

        self.socket.send(&msg.serialize()?)?;

        let pid = self.socket.pid()?;
        let mut res: Vec<Vec<u8>> = Vec::new();

        'done: loop {
            let (msgs, from) = self.socket.recv()?;

            if from.nl_pid != PID_KERNEL {
                bail!(
                    "wrong sender pid: {}, expected: {}",
                    from.nl_pid,
                    PID_KERNEL
                );
            }

            for mut m in msgs {
                if m.verify_header(next_seq, pid).is_err() {
                    continue;
                }

                match m.header.nlmsg_type {
                    NLMSG_DONE | NLMSG_ERROR => {
                        let payload = m.payload.take().unwrap_or_default();
                        let err_no = match payload.get(..4) {
                            Some(b) => i32::from_ne_bytes(b.try_into()?),
                            None => 0,
                        };

                        if err_no == 0 {
                            break 'done;
                        }

                        let detail = ext_ack_message(&payload, m.header.nlmsg_flags);
                        return Err(NetlinkError::kernel(-err_no, detail).into());
                    }
                    t if res_type != 0 && t != res_type => {
                        continue;
                    }
                    _ => {
                        if let Some(payload) = m.payload.take() {
                            res.push(payload);
                        }
                    }
                }

                if m.check_last_message() {
                    break 'done;
                }
            }
        }

        Ok(res)
    }
}

// The error payload is errno, the echoed request, then optional TLVs.
fn ext_ack_message(payload: &[u8], flags: u16) -> Option<String> {
    if flags & NLM_F_ACK_TLVS == 0 {
        return None;
    }

    let echoed = if flags & NLM_F_CAPPED != 0 {
        NLMSG_HDRLEN
    } else {
        let len = payload.get(4..8)?;
        u32::from_ne_bytes(len.try_into().ok()?) as usize
    };

    let tlvs = payload.get(4 + echoed..)?;
    RouteAttrs::try_from(tlvs)
        .ok()?
        .iter()
        .find(|attr| attr.rta_type == NLMSGERR_ATTR_MSG)
        .and_then(|attr| attr.payload.to_c_string().ok())
}

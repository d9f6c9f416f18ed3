use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetlinkError {
    #[error("{source} (errno {errno}){}", .detail.as_ref().map(|d| format!(": {d}")).unwrap_or_default())]
    Kernel {
        errno: i32,
        source: std::io::Error,
        detail: Option<String>,
    },

    #[error("invalid address length: {0}")]
    InvalidLength(usize),

    #[error("no link found")]
    LinkNotFound,
}

impl NetlinkError {
    pub fn kernel(errno: i32, detail: Option<String>) -> Self {
        Self::Kernel {
            errno,
            source: std::io::Error::from_raw_os_error(errno),
            detail,
        }
    }
}

/// Returns the kernel errno carried by `err`, if it came from a netlink ack.
pub fn errno_of(err: &anyhow::Error) -> Option<i32> {
    err.chain()
        .find_map(|cause| match cause.downcast_ref::<NetlinkError>() {
            Some(NetlinkError::Kernel { errno, .. }) => Some(*errno),
            _ => None,
        })
}

/// Whether `err` means the object being looked up or removed does not exist.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    let link_missing = err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<NetlinkError>(),
            Some(NetlinkError::LinkNotFound)
        )
    });

    link_missing
        || matches!(
            errno_of(err),
            Some(libc::ENOENT) | Some(libc::ESRCH) | Some(libc::ENODEV)
        )
}

pub fn is_exists(err: &anyhow::Error) -> bool {
    errno_of(err) == Some(libc::EEXIST)
}

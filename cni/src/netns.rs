use std::{
    fs::File,
    os::fd::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use nix::sched::{setns, CloneFlags};
use tracing::error;

const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Handle to a network namespace, held open for the handle's lifetime.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    path: PathBuf,
}

impl NetNs {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open netns {}", path.display()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Namespace of the calling thread.
    pub fn current() -> Result<Self> {
        Self::open(THREAD_NETNS)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    fn enter(&self) -> Result<()> {
        setns(&self.file, CloneFlags::CLONE_NEWNET)
            .with_context(|| format!("failed to enter netns {}", self.path.display()))
    }

    /// Runs `f` with the calling thread switched into this namespace.
    ///
    /// `f` receives the namespace the thread was in before. Netlink sockets
    /// opened inside `f` belong to this namespace.
    pub fn run<T>(&self, f: impl FnOnce(&NetNs) -> Result<T>) -> Result<T> {
        let prev = NetNs::current()?;
        self.enter()?;

        let guard = Restore {
            ns: &prev,
            pending: true,
        };
        let result = f(&prev);
        guard.restore()?;

        result
    }
}

struct Restore<'a> {
    ns: &'a NetNs,
    pending: bool,
}

impl Restore<'_> {
    fn restore(mut self) -> Result<()> {
        self.pending = false;
        self.ns.enter()
    }
}

impl Drop for Restore<'_> {
    fn drop(&mut self) {
        if self.pending {
            if let Err(e) = self.ns.enter() {
                error!("failed to restore netns {}: {e:#}", self.ns.path.display());
            }
        }
    }
}

/// A fresh namespace kept alive by an open fd, addressable as `/proc/self/fd/N`.
#[cfg(test)]
pub(crate) fn spawn_netns() -> NetNs {
    let ns = std::thread::spawn(|| {
        nix::sched::unshare(CloneFlags::CLONE_NEWNET).unwrap();
        NetNs::current().unwrap()
    })
    .join()
    .unwrap();

    NetNs {
        path: PathBuf::from(format!("/proc/self/fd/{}", ns.fd())),
        file: ns.file,
    }
}

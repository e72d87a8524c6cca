use std::{
    os::unix::io::{AsFd, BorrowedFd, OwnedFd},
    sync::Arc,
};

use drm::{control::Device as ControlDevice, Device as BasicDevice};
use tracing::{debug, warn};

use crate::utils::DevPath;

#[derive(Debug)]
struct Node {
    fd: OwnedFd,
    master: bool,
}

impl AsFd for Node {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl BasicDevice for Node {}

impl Drop for Node {
    fn drop(&mut self) {
        debug!(path = ?self.dev_path(), "closing drm device");
        if self.master {
            if let Err(err) = self.release_master_lock() {
                warn!(%err, "failed to drop drm master");
            }
        }
    }
}

/// Shared descriptor of an open drm device node
///
/// Framebuffers and property blobs hold a clone so they can remove themselves on drop.
/// The master lock taken on creation is released together with the last clone.
#[derive(Debug, Clone)]
pub struct DrmDeviceFd {
    node: Arc<Node>,
}

impl DrmDeviceFd {
    /// Wrap an open device node and try to become drm master.
    ///
    /// Not getting the lock is not fatal, kernels grant modesetting rights to the first
    /// opener of a node anyway.
    pub fn new(fd: OwnedFd) -> DrmDeviceFd {
        let mut node = Node { fd, master: false };
        match node.acquire_master_lock() {
            Ok(()) => node.master = true,
            Err(err) => warn!(%err, "unable to become drm master, continuing unprivileged"),
        }
        DrmDeviceFd { node: Arc::new(node) }
    }

    /// Returns whether this process holds the master lock
    pub fn is_privileged(&self) -> bool {
        self.node.master
    }
}

impl AsFd for DrmDeviceFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.node.as_fd()
    }
}

impl BasicDevice for DrmDeviceFd {}
impl ControlDevice for DrmDeviceFd {}

//! Helper for synchronizing rendering and display operations
//!
//! Both the GPU and the display engine report completion through dma-fences exported
//! as `sync_file` descriptors. [`FenceHandle`] owns such a descriptor and offers the
//! few queries the repaint pipeline needs.

use std::{
    io,
    mem,
    os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd},
    time::Duration,
};

use rustix::event::{poll, PollFd, PollFlags};
use rustix::ioctl::{ioctl, ReadWriteOpcode, Updater};
use tracing::trace;

use crate::utils::{Monotonic, Time};

/// `SYNC_IOC_FILE_INFO` from `linux/sync_file.h`
type SyncFileInfoOpcode = ReadWriteOpcode<b'>', 4, SyncFileInfo>;

#[repr(C)]
#[derive(Clone, Copy)]
#[allow(dead_code)]
struct SyncFenceInfo {
    obj_name: [u8; 32],
    driver_name: [u8; 32],
    status: i32,
    flags: u32,
    timestamp_ns: u64,
}

#[repr(C)]
#[allow(dead_code)]
struct SyncFileInfo {
    name: [u8; 32],
    status: i32,
    flags: u32,
    num_fences: u32,
    pad: u32,
    sync_fence_info: u64,
}

impl SyncFileInfo {
    fn empty() -> Self {
        // all-zero is a valid bit pattern for the uapi struct
        unsafe { mem::zeroed() }
    }
}

/// Owned dma-fence file descriptor
///
/// The descriptor is closed on drop. Handing it to the kernel as an in-fence
/// only lends the raw value, the kernel takes its own reference during the commit.
#[derive(Debug)]
pub struct FenceHandle(OwnedFd);

impl FenceHandle {
    /// Returns `true` if the descriptor refers to a `sync_file` carrying at least one fence
    pub fn is_valid(&self) -> bool {
        match self.file_info(&mut []) {
            Ok(info) => info.num_fences > 0,
            Err(err) => {
                trace!(fd = self.0.as_raw_fd(), ?err, "not a sync_file");
                false
            }
        }
    }

    /// Queries the state of the fence without blocking
    pub fn is_signaled(&self) -> bool {
        matches!(self.wait(Some(Duration::ZERO)), Ok(true))
    }

    /// Blocks the current thread until the fence is signaled or `timeout` elapsed
    ///
    /// `None` waits without a timeout. Returns whether the fence was signaled.
    #[profiling::function]
    pub fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        let timeout = timeout
            .map(|t| t.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);
        let mut fds = [PollFd::new(&self.0, PollFlags::IN)];
        loop {
            match poll(&mut fds, timeout) {
                Ok(ready) => return Ok(ready > 0 && fds[0].revents().contains(PollFlags::IN)),
                Err(rustix::io::Errno::INTR) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Time the fence signaled on the monotonic clock
    ///
    /// For a `sync_file` merging several fences this is the latest of all of them.
    /// Returns `Ok(None)` while the fence has not signaled yet, this never blocks.
    pub fn completion_time(&self) -> io::Result<Option<Time<Monotonic>>> {
        let info = self.file_info(&mut [])?;
        if info.status != 1 || info.num_fences == 0 {
            return Ok(None);
        }

        let mut fences = vec![
            SyncFenceInfo {
                obj_name: [0; 32],
                driver_name: [0; 32],
                status: 0,
                flags: 0,
                timestamp_ns: 0,
            };
            info.num_fences as usize
        ];
        self.file_info(&mut fences)?;

        Ok(fences
            .iter()
            .filter(|fence| fence.status == 1)
            .map(|fence| fence.timestamp_ns)
            .max()
            .map(Time::from_nanos))
    }

    fn file_info(&self, fences: &mut [SyncFenceInfo]) -> io::Result<SyncFileInfo> {
        let mut info = SyncFileInfo::empty();
        info.num_fences = fences.len() as u32;
        if !fences.is_empty() {
            info.sync_fence_info = fences.as_mut_ptr() as u64;
        }

        // SAFETY: the opcode matches the uapi struct and `sync_fence_info` points to
        // `num_fences` entries that outlive the call
        unsafe { ioctl(&self.0, Updater::<SyncFileInfoOpcode, _>::new(&mut info)) }?;
        Ok(info)
    }
}

impl From<OwnedFd> for FenceHandle {
    fn from(fd: OwnedFd) -> Self {
        FenceHandle(fd)
    }
}

impl From<FenceHandle> for OwnedFd {
    fn from(fence: FenceHandle) -> Self {
        fence.0
    }
}

impl AsFd for FenceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl AsRawFd for FenceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.0.as_raw_fd()
    }
}

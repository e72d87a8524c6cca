use std::io;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

use drm::control::{atomic::AtomicModeReq, crtc, AtomicCommitFlags, Device as ControlDevice, Event};
use drm::{ClientCapability, Device as BasicDevice, DriverCapability};
use rustix::fs::{Mode, OFlags};
use tracing::{debug, info, info_span, instrument, trace, warn};

use super::atomic::AtomicRequest;
use super::error::{AccessError, Error};
use crate::utils::{DevPath, Monotonic, Time};

mod fd;
pub mod props;

pub use self::fd::DrmDeviceFd;

/// A commit of a crtc took effect on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionEvent {
    /// Crtc the commit was applied to
    pub crtc: crtc::Handle,
    /// Time the new frame started scanning out
    pub time: Time<Monotonic>,
}

/// Kernel side of the repaint pipeline
///
/// [`DrmDevice`] is the implementation talking to the kernel. The trait exists so the
/// event loop can be driven without display hardware.
pub trait KmsDevice {
    /// Submit an atomic request
    fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()>;

    /// Read pending completion events
    ///
    /// Blocks if no event is pending, so it should only be called once the
    /// device descriptor became readable.
    fn read_events(&self) -> io::Result<Vec<CompletionEvent>>;
}

/// An open drm device with universal planes and atomic modesetting enabled
#[derive(Debug)]
pub struct DrmDevice {
    fd: DrmDeviceFd,
    supports_fb_modifiers: bool,
    has_monotonic_timestamps: bool,
    span: tracing::Span,
}

impl DrmDevice {
    /// Open the device node at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let fd = rustix::fs::open(path, OFlags::RDWR | OFlags::CLOEXEC, Mode::empty()).map_err(
            |errno| AccessError {
                errmsg: "Failed to open device node",
                dev: Some(path.to_path_buf()),
                source: errno.into(),
            },
        )?;
        DrmDevice::new(DrmDeviceFd::new(fd))
    }

    /// Open the first primary node under `/dev/dri` accepting atomic modesetting
    pub fn open_default() -> Result<Self, Error> {
        let mut nodes = std::fs::read_dir("/dev/dri")
            .map_err(|source| AccessError {
                errmsg: "Failed to list device nodes",
                dev: Some(PathBuf::from("/dev/dri")),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.starts_with("card"))
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>();
        nodes.sort();

        for node in nodes {
            match DrmDevice::open(&node) {
                Ok(device) => return Ok(device),
                Err(err) => debug!(?node, %err, "skipping device"),
            }
        }
        Err(Error::NoDevice)
    }

    /// Enable the capabilities the pipeline depends on
    pub fn new(fd: DrmDeviceFd) -> Result<Self, Error> {
        let span = info_span!("drm_device", path = ?fd.dev_path());
        let _guard = span.enter();

        if fd
            .set_client_capability(ClientCapability::UniversalPlanes, true)
            .is_err()
        {
            return Err(Error::NoUniversalPlanes(fd.dev_path()));
        }
        if fd.set_client_capability(ClientCapability::Atomic, true).is_err() {
            return Err(Error::NoAtomic(fd.dev_path()));
        }

        let supports_fb_modifiers = fd
            .get_driver_capability(DriverCapability::AddFB2Modifiers)
            .unwrap_or(0)
            == 1;
        let has_monotonic_timestamps =
            monotonic_timestamps(fd.get_driver_capability(DriverCapability::MonotonicTimestamp));
        info!(
            privileged = fd.is_privileged(),
            supports_fb_modifiers, "Initialized atomic drm device"
        );

        drop(_guard);
        Ok(DrmDevice {
            fd,
            supports_fb_modifiers,
            has_monotonic_timestamps,
            span,
        })
    }

    /// The underlying file descriptor
    pub fn device_fd(&self) -> &DrmDeviceFd {
        &self.fd
    }

    /// Returns whether framebuffers can be created with explicit modifiers
    pub fn supports_fb_modifiers(&self) -> bool {
        self.supports_fb_modifiers
    }

    /// Returns whether completion timestamps are taken from the monotonic clock
    pub fn has_monotonic_timestamps(&self) -> bool {
        self.has_monotonic_timestamps
    }
}

impl AsFd for DrmDevice {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl KmsDevice for DrmDevice {
    #[instrument(level = "trace", parent = &self.span, skip(self, request))]
    #[profiling::function]
    fn commit(&self, request: &AtomicRequest, flags: AtomicCommitFlags) -> io::Result<()> {
        let mut req = AtomicModeReq::new();
        for write in request.writes() {
            req.add_raw_property(write.object, write.property, write.value);
        }
        self.fd.atomic_commit(flags, req)
    }

    #[profiling::function]
    fn read_events(&self) -> io::Result<Vec<CompletionEvent>> {
        Ok(self
            .fd
            .receive_events()?
            .filter_map(|event| match event {
                Event::PageFlip(event) => {
                    trace!(parent: &self.span, crtc = ?event.crtc, frame = event.frame, "page-flip event");
                    Some(CompletionEvent {
                        crtc: event.crtc,
                        time: Time::from(event.duration),
                    })
                }
                _ => None,
            })
            .collect())
    }
}

/// Interpret `DRM_CAP_TIMESTAMP_MONOTONIC`, warning once if page-flip timestamps
/// are taken from another clock
fn monotonic_timestamps(capability: io::Result<u64>) -> bool {
    let monotonic = matches!(capability, Ok(1));
    if !monotonic {
        warn!("Device does not report monotonic timestamps, frame timing diagnostics will be off");
    }
    monotonic
}

use std::{io, path::PathBuf};

use drm::control::{crtc, plane, AtomicCommitFlags, Mode, RawResourceHandle};

/// A failed ioctl on a drm device
#[derive(thiserror::Error, Debug)]
#[error("DRM access error: {errmsg} on device `{dev:?}` ({source:})")]
pub struct AccessError {
    /// Error message associated to the access error
    pub errmsg: &'static str,
    /// Device on which the error was generated
    pub dev: Option<PathBuf>,
    /// Underlying device error
    #[source]
    pub source: io::Error,
}

/// Errors thrown while setting up the [`DrmDevice`](super::DrmDevice)
/// and the [`Output`](super::Output)s driven by it.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The device encountered an access error
    #[error(transparent)]
    Access(#[from] AccessError),
    /// No usable drm device was found
    #[error("No drm device supporting atomic modesetting was found")]
    NoDevice,
    /// The device refused the universal planes capability
    #[error("Device `{0:?}` does not support universal planes")]
    NoUniversalPlanes(Option<PathBuf>),
    /// The device refused the atomic capability
    #[error("Device `{0:?}` does not support atomic modesetting")]
    NoAtomic(Option<PathBuf>),
    /// No connector is currently driven by an active crtc
    #[error("No active outputs found")]
    NoActiveOutputs,
    /// No primary plane is usable with the given crtc
    #[error("No primary plane found for crtc `{0:?}`")]
    NoPrimaryPlane(crtc::Handle),
    /// The mode does not have a usable refresh rate
    #[error("Mode `{0:?}` has an invalid refresh rate")]
    InvalidRefresh(Mode),
    /// The `IN_FORMATS` blob of a plane could not be parsed
    #[error("Malformed IN_FORMATS blob on plane `{0:?}`")]
    InFormats(plane::Handle),
    /// The device is missing a required property
    #[error("The DrmDevice is missing a required property '{name}' for handle ({handle:?})")]
    UnknownProperty {
        /// Object handle
        handle: RawResourceHandle,
        /// Property name
        name: &'static str,
    },
}

/// Errors of an atomic commit
#[derive(thiserror::Error, Debug)]
pub enum CommitError {
    /// The kernel rejected the property set
    #[error("Atomic commit with flags {flags:?} was rejected by the kernel")]
    Rejected {
        /// Flags the commit was issued with
        flags: AtomicCommitFlags,
        /// Underlying device error
        #[source]
        source: io::Error,
    },
}

//! Module for scanout images created using [libgbm](gbm).
//!
//! [`GbmAllocator`] implements the [`Allocator`] trait producing [`GbmImage`]s: buffer objects
//! usable for rendering and scanout, already attached to a kernel framebuffer.

use std::io;

use drm::{
    buffer::PlanarBuffer,
    control::{framebuffer, Device as ControlDevice, FbCmd2Flags},
};
use gbm::BufferObject;
pub use gbm::{BufferObjectFlags as GbmBufferFlags, Device as GbmDevice};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};

use super::{Allocator, Format, Fourcc, Image, Modifier};
use crate::backend::drm::{error::AccessError, DrmDevice, DrmDeviceFd};
use crate::utils::DevPath;

/// A GBM buffer object attached to a kernel framebuffer
///
/// The framebuffer is removed when the image is dropped.
#[derive(Debug)]
pub struct GbmImage {
    bo: BufferObject<()>,
    fb: framebuffer::Handle,
    format: Format,
    drm: DrmDeviceFd,
}

impl Drop for GbmImage {
    fn drop(&mut self) {
        trace!(fb = ?self.fb, "destroying framebuffer");
        if let Err(err) = self.drm.destroy_framebuffer(self.fb) {
            warn!(fb = ?self.fb, ?err, "failed to destroy framebuffer");
        }
    }
}

impl GbmImage {
    /// The underlying buffer object
    pub fn bo(&self) -> &BufferObject<()> {
        &self.bo
    }

    /// Mutable access to the underlying buffer object, e.g. to map it
    pub fn bo_mut(&mut self) -> &mut BufferObject<()> {
        &mut self.bo
    }
}

impl Image for GbmImage {
    fn width(&self) -> u32 {
        PlanarBuffer::size(&self.bo).0
    }

    fn height(&self) -> u32 {
        PlanarBuffer::size(&self.bo).1
    }

    fn format(&self) -> Format {
        self.format
    }

    fn framebuffer(&self) -> framebuffer::Handle {
        self.fb
    }
}

/// Possible errors for allocating a [`GbmImage`]
#[derive(Error, Debug)]
pub enum Error {
    /// libgbm failed to allocate the buffer object
    #[error("failed to allocate a {width}x{height} {fourcc} buffer object")]
    Allocate {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
        /// Requested format
        fourcc: Fourcc,
        /// Underlying gbm error
        #[source]
        source: io::Error,
    },
    /// Failed to add a framebuffer for the bo
    #[error("failed to add a framebuffer for the bo")]
    Framebuffer(#[source] AccessError),
}

/// Allocates scanout capable [`GbmImage`]s on a drm device
#[derive(Debug)]
pub struct GbmAllocator {
    device: GbmDevice<DrmDeviceFd>,
    drm: DrmDeviceFd,
    fb_modifiers: bool,
}

impl GbmAllocator {
    /// Create a gbm device on top of an opened drm device
    pub fn new(drm: &DrmDevice) -> io::Result<Self> {
        let device = GbmDevice::new(drm.device_fd().clone())?;
        Ok(GbmAllocator {
            device,
            drm: drm.device_fd().clone(),
            fb_modifiers: drm.supports_fb_modifiers(),
        })
    }

    /// The gbm device buffer objects are allocated from
    pub fn device(&self) -> &GbmDevice<DrmDeviceFd> {
        &self.device
    }

    fn allocate(
        &self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<(BufferObject<()>, bool), Error> {
        let explicit = modifiers
            .iter()
            .copied()
            .filter(|m| *m != Modifier::Invalid)
            .collect::<Vec<_>>();

        if self.fb_modifiers && !explicit.is_empty() {
            match self.device.create_buffer_object_with_modifiers::<()>(
                width,
                height,
                fourcc,
                explicit.iter().copied(),
            ) {
                Ok(bo) => return Ok((bo, false)),
                Err(err) => {
                    warn!(?err, "allocation with modifiers failed, falling back to implicit layout")
                }
            }
        }

        self.device
            .create_buffer_object::<()>(
                width,
                height,
                fourcc,
                GbmBufferFlags::SCANOUT | GbmBufferFlags::RENDERING,
            )
            .map(|bo| (bo, true))
            .map_err(|source| Error::Allocate {
                width,
                height,
                fourcc,
                source,
            })
    }
}

impl Allocator<GbmImage> for GbmAllocator {
    type Error = Error;

    #[instrument(level = "debug", skip(self, modifiers))]
    fn create_image(
        &mut self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<GbmImage, Error> {
        let (bo, implicit) = self.allocate(width, height, fourcc, modifiers)?;

        // Buffers allocated through the legacy entry point may report a nonsensical
        // modifier, they have to be added without one.
        let modifier = if implicit || !self.fb_modifiers {
            None
        } else {
            PlanarBuffer::modifier(&bo).filter(|m| *m != Modifier::Invalid)
        };
        let flags = if modifier.is_some() {
            FbCmd2Flags::MODIFIERS
        } else {
            FbCmd2Flags::empty()
        };

        let fb = self
            .drm
            .add_planar_framebuffer(&FramebufferSource { bo: &bo, modifier }, flags)
            .map_err(|source| {
                Error::Framebuffer(AccessError {
                    errmsg: "Failed to add framebuffer",
                    dev: self.drm.dev_path(),
                    source,
                })
            })?;

        let format = Format {
            code: fourcc,
            modifier: modifier.unwrap_or(Modifier::Invalid),
        };
        debug!(?fb, ?format, "created scanout image");

        Ok(GbmImage {
            bo,
            fb,
            format,
            drm: self.drm.clone(),
        })
    }
}

struct FramebufferSource<'a> {
    bo: &'a BufferObject<()>,
    modifier: Option<Modifier>,
}

impl<'a> PlanarBuffer for FramebufferSource<'a> {
    fn size(&self) -> (u32, u32) {
        PlanarBuffer::size(self.bo)
    }

    fn format(&self) -> Fourcc {
        PlanarBuffer::format(self.bo)
    }

    fn modifier(&self) -> Option<Modifier> {
        self.modifier
    }

    fn pitches(&self) -> [u32; 4] {
        PlanarBuffer::pitches(self.bo)
    }

    fn handles(&self) -> [Option<drm::buffer::Handle>; 4] {
        PlanarBuffer::handles(self.bo)
    }

    fn offsets(&self) -> [u32; 4] {
        PlanarBuffer::offsets(self.bo)
    }
}

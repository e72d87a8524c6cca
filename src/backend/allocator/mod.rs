//! Buffer allocation and management.
//!
//! Collection of the traits and types around scanout buffers:
//!
//! - [`Image`] describes a GPU image already wrapped in a kernel framebuffer
//! - [`Allocator`] creates such images
//! - [`Buffer`] adds the fence slots and use-state the repaint pipeline tracks per image
//! - [`BufferRing`] is the fixed pool of buffers owned by one output
//!
//! Allocators provided:
//! - Gbm Buffers through [`gbm::GbmAllocator`]

pub(crate) mod buffer;
#[cfg(feature = "backend_gbm")]
pub mod gbm;
pub(crate) mod ring;

pub use buffer::{Buffer, BufferState};
pub use ring::{BufferRing, MIN_RING_DEPTH};

pub use drm_fourcc::{
    DrmFormat as Format, DrmFourcc as Fourcc, DrmModifier as Modifier, DrmVendor as Vendor,
    UnrecognizedFourcc, UnrecognizedVendor,
};

use drm::control::framebuffer;

/// Common properties of a scanout image.
pub trait Image {
    /// Width of the two-dimensional image
    fn width(&self) -> u32;
    /// Height of the two-dimensional image
    fn height(&self) -> u32;
    /// Size (w x h) of the two-dimensional image
    fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }
    /// Pixel format and modifier of the image
    fn format(&self) -> Format;
    /// Kernel framebuffer the display engine reads the image through
    fn framebuffer(&self) -> framebuffer::Handle;
}

/// Interface to create scanout images
pub trait Allocator<I: Image> {
    /// Error type thrown if allocations fail
    type Error: std::error::Error;

    /// Try to create an image with the given dimensions and pixel format
    ///
    /// `modifiers` lists the layouts the plane accepts, an empty list means
    /// only an implicit layout can be used.
    fn create_image(
        &mut self,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<I, Self::Error>;
}

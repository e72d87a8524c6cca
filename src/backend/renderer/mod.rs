//! Interface to the GPU renderer producing frames
//!
//! The repaint pipeline does not care how a frame is drawn. A [`Renderer`] is handed a
//! [`Buffer`] whose image it has to fill and may return a fence signaling the end of the
//! GPU work, which is then passed to the kernel instead of waiting for it on the CPU.

pub mod sync;

use crate::backend::allocator::{Buffer, Image};

use self::sync::FenceHandle;

/// Draws frames into scanout buffers
pub trait Renderer {
    /// Image type this renderer is able to draw into
    type Image: Image;
    /// Error type returned by the rendering operations
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns whether [`render_into`](Renderer::render_into) is able to return completion fences
    fn supports_explicit_fencing(&self) -> bool {
        false
    }

    /// Draws exactly one frame into `buffer`
    ///
    /// `frame` is the animation position derived from the output's frame clock.
    /// Returns a fence signaling completion of the GPU work, or `None` if the
    /// writes are already complete or synchronized implicitly.
    fn render_into(
        &mut self,
        buffer: &mut Buffer<Self::Image>,
        frame: u64,
    ) -> Result<Option<FenceHandle>, Self::Error>;
}

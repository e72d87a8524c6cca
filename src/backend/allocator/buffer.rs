use std::fmt;

use tracing::trace;

use super::Image;
use crate::backend::renderer::sync::FenceHandle;

/// Use-state of a [`Buffer`]
///
/// A buffer cycles through `Free -> Rendering -> PendingCommit -> Displayed -> Free`,
/// no state is ever skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferState {
    /// Neither the GPU nor the display engine uses the buffer
    Free,
    /// The renderer is drawing into the buffer
    Rendering,
    /// The buffer is part of a submitted commit that has not completed yet
    PendingCommit,
    /// The buffer is being scanned out
    Displayed,
}

/// A scanout image plus the bookkeeping of its current use
pub struct Buffer<I> {
    image: I,
    state: BufferState,
    render_fence: Option<FenceHandle>,
    display_fence: Option<FenceHandle>,
}

impl<I: Image> fmt::Debug for Buffer<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("framebuffer", &self.image.framebuffer())
            .field("size", &self.image.size())
            .field("state", &self.state)
            .field("render_fence", &self.render_fence)
            .field("display_fence", &self.display_fence)
            .finish()
    }
}

impl<I: Image> Buffer<I> {
    /// Wrap a freshly allocated image, the buffer starts out `Free`
    pub fn new(image: I) -> Self {
        Buffer {
            image,
            state: BufferState::Free,
            render_fence: None,
            display_fence: None,
        }
    }

    /// The underlying image
    pub fn image(&self) -> &I {
        &self.image
    }

    /// Mutable access to the underlying image, e.g. for mapping it
    pub fn image_mut(&mut self) -> &mut I {
        &mut self.image
    }

    /// Current use-state
    pub fn state(&self) -> BufferState {
        self.state
    }

    /// Fence signaling the end of the GPU writes of the last frame, if any
    pub fn render_fence(&self) -> Option<&FenceHandle> {
        self.render_fence.as_ref()
    }

    /// Fence signaling the end of the display commit that replaced this buffer on screen
    pub fn display_fence(&self) -> Option<&FenceHandle> {
        self.display_fence.as_ref()
    }

    /// Returns `true` unless a display fence is present and still unsignaled
    pub fn display_idle(&self) -> bool {
        self.display_fence
            .as_ref()
            .map(FenceHandle::is_signaled)
            .unwrap_or(true)
    }

    /// `Free -> Rendering`
    ///
    /// Drops whatever fences are left from the previous use.
    pub fn begin_rendering(&mut self) {
        self.transition(BufferState::Free, BufferState::Rendering);
        self.render_fence = None;
        self.display_fence = None;
    }

    /// `Rendering -> PendingCommit`
    pub fn finish_rendering(&mut self, render_fence: Option<FenceHandle>) {
        self.transition(BufferState::Rendering, BufferState::PendingCommit);
        self.render_fence = render_fence;
    }

    /// `Rendering -> Free`, used when the renderer failed to produce a frame
    pub fn abort_rendering(&mut self) {
        self.transition(BufferState::Rendering, BufferState::Free);
        self.render_fence = None;
    }

    /// `PendingCommit -> Free`, used when the commit carrying the buffer was dropped
    pub fn abort_commit(&mut self) {
        self.transition(BufferState::PendingCommit, BufferState::Free);
        self.render_fence = None;
    }

    /// `PendingCommit -> Displayed`
    pub fn mark_displayed(&mut self) {
        self.transition(BufferState::PendingCommit, BufferState::Displayed);
        self.render_fence = None;
    }

    /// `Displayed -> Free`
    ///
    /// The display fence, if any, is kept so reuse can be deferred until it signaled.
    pub fn release(&mut self) {
        self.transition(BufferState::Displayed, BufferState::Free);
    }

    /// Stash the out-fence of the commit that replaces this buffer on screen
    pub fn set_display_fence(&mut self, fence: FenceHandle) {
        self.display_fence = Some(fence);
    }

    /// Take the render fence, leaving the slot empty
    pub fn take_render_fence(&mut self) -> Option<FenceHandle> {
        self.render_fence.take()
    }

    fn transition(&mut self, from: BufferState, to: BufferState) {
        assert_eq!(
            self.state,
            from,
            "invalid buffer transition to {:?} for framebuffer {:?}",
            to,
            self.image.framebuffer()
        );
        trace!(fb = ?self.image.framebuffer(), ?from, ?to, "buffer state");
        self.state = to;
    }
}

use tracing::{debug, warn};

use super::{Allocator, Buffer, BufferState, Fourcc, Image, Modifier};

/// Smallest ring depth able to hold a displayed, a pending and a rendering buffer at once.
pub const MIN_RING_DEPTH: usize = 3;

/// Fixed set of re-usable buffers of one output.
///
/// ## How am I supposed to use this?
///
/// To avoid showing rendering artifacts, the buffer currently scanned out is never drawn into.
/// With double-buffering one buffer is displayed while the other one is rendered to. As commits
/// complete asynchronously, a third buffer is needed: one displayed, one submitted to the kernel
/// but not yet on screen, and one the renderer can use in the meantime.
///
/// All you tell the ring is: *"Give me the next free buffer"* (by calling
/// [`acquire_free`](BufferRing::acquire_free)). The buffer then walks through its
/// [`BufferState`]s and comes back once a later buffer replaced it on screen
/// ([`release`](BufferRing::release)).
///
/// The ring is touched only by the event loop thread, so it needs no locking.
#[derive(Debug)]
pub struct BufferRing<I: Image> {
    buffers: Vec<Buffer<I>>,
}

impl<I: Image> BufferRing<I> {
    /// Create a ring out of already allocated buffers.
    ///
    /// Panics if fewer than [`MIN_RING_DEPTH`] buffers are given.
    pub fn new(buffers: Vec<Buffer<I>>) -> Self {
        assert!(
            buffers.len() >= MIN_RING_DEPTH,
            "buffer ring needs at least {} buffers, got {}",
            MIN_RING_DEPTH,
            buffers.len()
        );
        BufferRing { buffers }
    }

    /// Allocate `depth` images with the desired allocator, dimensions and pixel format.
    pub fn allocate<A: Allocator<I>>(
        allocator: &mut A,
        depth: usize,
        width: u32,
        height: u32,
        fourcc: Fourcc,
        modifiers: &[Modifier],
    ) -> Result<Self, A::Error> {
        let buffers = (0..depth.max(MIN_RING_DEPTH))
            .map(|_| {
                allocator
                    .create_image(width, height, fourcc, modifiers)
                    .map(Buffer::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(depth = buffers.len(), width, height, ?fourcc, "allocated buffer ring");
        Ok(BufferRing { buffers })
    }

    /// Select a free buffer and move it to [`BufferState::Rendering`].
    ///
    /// Free buffers whose display fence already signaled are preferred. If only buffers
    /// with an unsignaled display fence are left, the first one is used anyway, as the
    /// kernel already reported the commit replacing it as complete.
    ///
    /// Panics if no buffer is free, which means the ring is too shallow for the
    /// number of buffers in flight.
    pub fn acquire_free(&mut self) -> usize {
        let mut free = self
            .buffers
            .iter()
            .enumerate()
            .filter(|(_, buffer)| buffer.state() == BufferState::Free)
            .map(|(idx, _)| idx)
            .peekable();

        let first = match free.peek() {
            Some(idx) => *idx,
            None => panic!(
                "no free buffer left in a ring of depth {}, buffers in use: {:?}",
                self.buffers.len(),
                self.buffers.iter().map(Buffer::state).collect::<Vec<_>>()
            ),
        };

        let idx = free
            .find(|idx| self.buffers[*idx].display_idle())
            .unwrap_or_else(|| {
                warn!(
                    fb = ?self.buffers[first].image().framebuffer(),
                    "reusing buffer before its display fence signaled"
                );
                first
            });

        self.buffers[idx].begin_rendering();
        idx
    }

    /// Move a displayed buffer back to [`BufferState::Free`].
    pub fn release(&mut self, idx: usize) {
        self.buffers[idx].release();
    }

    /// Access a buffer of the ring
    pub fn get(&self, idx: usize) -> &Buffer<I> {
        &self.buffers[idx]
    }

    /// Mutable access to a buffer of the ring
    pub fn get_mut(&mut self, idx: usize) -> &mut Buffer<I> {
        &mut self.buffers[idx]
    }

    /// Number of buffers in the ring
    pub fn depth(&self) -> usize {
        self.buffers.len()
    }

    /// Number of buffers in `state`
    pub fn count(&self, state: BufferState) -> usize {
        self.buffers.iter().filter(|b| b.state() == state).count()
    }

    /// Iterate over all buffers
    pub fn iter(&self) -> impl Iterator<Item = &Buffer<I>> {
        self.buffers.iter()
    }
}

#[cfg(test)]
mod test {
    use super::BufferRing;
    use crate::backend::allocator::buffer::test::{dummy_fence, DummyImage};
    use crate::backend::allocator::{Allocator, Buffer, BufferState, Fourcc, Modifier};

    fn ring(depth: u32) -> BufferRing<DummyImage> {
        BufferRing::new((1..=depth).map(|fb| Buffer::new(DummyImage::new(fb))).collect())
    }

    #[test]
    fn acquires_first_free() {
        let mut ring = ring(3);
        assert_eq!(ring.acquire_free(), 0);
        assert_eq!(ring.acquire_free(), 1);
        assert_eq!(ring.get(0).state(), BufferState::Rendering);
        assert_eq!(ring.count(BufferState::Free), 1);
    }

    #[test]
    #[should_panic(expected = "no free buffer left")]
    fn exhausted_ring_panics() {
        let mut ring = ring(3);
        for _ in 0..4 {
            ring.acquire_free();
        }
    }

    #[test]
    #[should_panic(expected = "at least 3")]
    fn shallow_ring_is_rejected() {
        ring(2);
    }

    #[test]
    fn steady_state_never_exhausts() {
        for depth in 3..6 {
            let mut ring = ring(depth);
            let mut displayed: Option<usize> = None;
            for _ in 0..50 {
                let idx = ring.acquire_free();
                ring.get_mut(idx).finish_rendering(None);

                let in_flight =
                    ring.count(BufferState::Rendering) + ring.count(BufferState::PendingCommit);
                assert!(in_flight <= depth as usize - 1);

                ring.get_mut(idx).mark_displayed();
                if let Some(previous) = displayed.replace(idx) {
                    ring.release(previous);
                }
                assert_eq!(ring.count(BufferState::Displayed), 1);
            }
        }
    }

    #[test]
    fn released_buffer_keeps_display_fence_until_reuse() {
        let mut ring = ring(3);
        let idx = ring.acquire_free();
        ring.get_mut(idx).finish_rendering(None);
        ring.get_mut(idx).mark_displayed();
        ring.get_mut(idx).set_display_fence(dummy_fence());
        ring.release(idx);
        assert!(ring.get(idx).display_fence().is_some());
    }

    struct CountingAllocator(u32);

    #[derive(Debug, thiserror::Error)]
    #[error("out of memory")]
    struct OutOfMemory;

    impl Allocator<DummyImage> for CountingAllocator {
        type Error = OutOfMemory;

        fn create_image(
            &mut self,
            _width: u32,
            _height: u32,
            _fourcc: Fourcc,
            _modifiers: &[Modifier],
        ) -> Result<DummyImage, OutOfMemory> {
            if self.0 == 0 {
                return Err(OutOfMemory);
            }
            self.0 -= 1;
            Ok(DummyImage::new(10 + self.0))
        }
    }

    #[test]
    fn allocate_enforces_minimum_depth() {
        let mut allocator = CountingAllocator(8);
        let ring = BufferRing::allocate(&mut allocator, 1, 64, 64, Fourcc::Xrgb8888, &[]).unwrap();
        assert_eq!(ring.depth(), 3);
        assert!(ring.iter().all(|b| b.state() == BufferState::Free));
    }

    #[test]
    fn allocation_failure_propagates() {
        let mut allocator = CountingAllocator(2);
        assert!(BufferRing::allocate(&mut allocator, 3, 64, 64, Fourcc::Xrgb8888, &[]).is_err());
    }
}

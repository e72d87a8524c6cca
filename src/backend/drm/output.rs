use std::time::Duration;

use drm::control::{connector, crtc, plane, Device as ControlDevice};
use tracing::{debug, info_span, instrument, trace, warn};

use super::atomic::AtomicRequestBuilder;
use super::device::props::OutputProperties;
use super::frame_clock::FrameClock;
use super::DrmDeviceFd;
use crate::backend::allocator::{BufferRing, Image};
use crate::backend::renderer::{sync::FenceHandle, Renderer};
use crate::utils::{Monotonic, Time};

/// Kernel property blob holding the mode of an output
///
/// The blob is destroyed on drop if it is owned by a device.
#[derive(Debug)]
pub struct ModeBlob {
    id: u64,
    device: Option<DrmDeviceFd>,
}

impl ModeBlob {
    /// Take ownership of a blob created on `device`
    pub fn new(device: DrmDeviceFd, id: u64) -> Self {
        ModeBlob {
            id,
            device: Some(device),
        }
    }

    /// Refer to a blob whose lifetime is managed elsewhere
    pub fn unowned(id: u64) -> Self {
        ModeBlob { id, device: None }
    }

    /// Blob id
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ModeBlob {
    fn drop(&mut self) {
        if let Some(device) = self.device.take() {
            trace!(blob = self.id, "destroying mode blob");
            if let Err(err) = device.destroy_property_blob(self.id) {
                warn!(blob = self.id, ?err, "failed to destroy mode blob");
            }
        }
    }
}

/// Identity and mode of an output as found during enumeration
#[derive(Debug)]
pub struct OutputSetup {
    /// Connector name, e.g. `HDMI-A-1`
    pub name: String,
    /// Connector driven by the output
    pub connector: connector::Handle,
    /// Crtc driving the connector
    pub crtc: crtc::Handle,
    /// Primary plane of the crtc
    pub plane: plane::Handle,
    /// Property ids of the three objects
    pub properties: OutputProperties,
    /// Active area of the mode
    pub mode_size: (u16, u16),
    /// Blob of the mode written on every commit
    pub mode_blob: ModeBlob,
    /// Length of one refresh cycle of the mode
    pub refresh: Duration,
}

/// One display output: a connector, its crtc and primary plane, plus the buffers shown on it
#[derive(Debug)]
pub struct Output<I: Image> {
    name: String,
    connector: connector::Handle,
    crtc: crtc::Handle,
    plane: plane::Handle,
    properties: OutputProperties,
    mode_size: (u16, u16),
    mode_blob: ModeBlob,
    ring: BufferRing<I>,
    clock: FrameClock,
    pending: Option<usize>,
    displayed: Option<usize>,
    needs_repaint: bool,
    explicit_fencing: bool,
    fence_check: fn(&FenceHandle) -> bool,
    span: tracing::Span,
}

impl<I: Image> Output<I> {
    /// Assemble an output out of its kernel objects, buffers and frame clock
    ///
    /// Explicit fencing starts out enabled whenever the kernel advertises both fence
    /// properties, see [`Output::set_explicit_fencing`].
    pub fn new(setup: OutputSetup, ring: BufferRing<I>, clock: FrameClock) -> Self {
        let span = info_span!("drm_output", name = %setup.name, crtc = ?setup.crtc);
        let explicit_fencing = setup.properties.explicit_fencing();
        debug!(
            parent: &span,
            connector = ?setup.connector,
            plane = ?setup.plane,
            mode = ?setup.mode_size,
            refresh = ?setup.refresh,
            depth = ring.depth(),
            explicit_fencing,
            "output created"
        );
        Output {
            name: setup.name,
            connector: setup.connector,
            crtc: setup.crtc,
            plane: setup.plane,
            properties: setup.properties,
            mode_size: setup.mode_size,
            mode_blob: setup.mode_blob,
            ring,
            clock,
            pending: None,
            displayed: None,
            needs_repaint: true,
            explicit_fencing,
            fence_check: FenceHandle::is_valid,
            span,
        }
    }

    /// Connector name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connector driven by this output
    pub fn connector(&self) -> connector::Handle {
        self.connector
    }

    /// Crtc driving this output
    pub fn crtc(&self) -> crtc::Handle {
        self.crtc
    }

    /// Primary plane used for scanout
    pub fn plane(&self) -> plane::Handle {
        self.plane
    }

    /// Cached property ids
    pub fn properties(&self) -> &OutputProperties {
        &self.properties
    }

    /// Active area of the mode
    pub fn mode_size(&self) -> (u16, u16) {
        self.mode_size
    }

    /// Id of the mode blob
    pub fn mode_blob(&self) -> u64 {
        self.mode_blob.id()
    }

    /// Buffers of this output
    pub fn ring(&self) -> &BufferRing<I> {
        &self.ring
    }

    /// Frame clock of this output
    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    /// Ring index of the buffer waiting for its commit to complete
    pub fn pending(&self) -> Option<usize> {
        self.pending
    }

    /// Ring index of the buffer being scanned out
    pub fn displayed(&self) -> Option<usize> {
        self.displayed
    }

    /// Returns whether a new frame should be rendered
    pub fn needs_repaint(&self) -> bool {
        self.needs_repaint
    }

    /// Returns whether the next commit will be the first one of this output
    pub fn is_first_commit(&self) -> bool {
        self.clock.last_completion().is_none()
    }

    /// Returns whether render and display fences are exchanged with the kernel
    pub fn explicit_fencing(&self) -> bool {
        self.explicit_fencing
    }

    /// Enable or disable explicit fencing
    ///
    /// Fencing stays disabled if the kernel lacks either fence property.
    pub fn set_explicit_fencing(&mut self, enabled: bool) {
        self.explicit_fencing = enabled && self.properties.explicit_fencing();
        debug!(parent: &self.span, explicit_fencing = self.explicit_fencing, "fencing mode");
    }

    /// Render the next frame and append it to `builder`.
    ///
    /// Returns whether the commit needs to allow a modeset, which is only the case for
    /// the very first commit of the output. If the renderer fails, the buffer goes back
    /// to the ring and nothing is appended.
    #[instrument(level = "trace", parent = &self.span, skip(self, renderer, builder))]
    #[profiling::function]
    pub fn repaint<R>(
        &mut self,
        renderer: &mut R,
        now: Time<Monotonic>,
        builder: &mut AtomicRequestBuilder,
    ) -> Result<bool, R::Error>
    where
        R: Renderer<Image = I>,
    {
        debug_assert!(self.needs_repaint && self.pending.is_none());

        let frame = self.clock.advance(now);
        let idx = self.ring.acquire_free();
        let buffer = self.ring.get_mut(idx);
        let fence = match renderer.render_into(buffer, frame) {
            Ok(fence) => fence,
            Err(err) => {
                buffer.abort_rendering();
                return Err(err);
            }
        };

        let fence = match fence {
            // The kernel orders scanout after the GPU writes on its own.
            Some(_) if !self.explicit_fencing => {
                trace!("dropping render fence, relying on implicit sync");
                None
            }
            Some(fence) if !(self.fence_check)(&fence) => {
                warn!("renderer returned an invalid fence, relying on implicit sync");
                None
            }
            fence => fence,
        };
        buffer.finish_rendering(fence);

        builder.add_output_state(self, self.ring.get(idx));
        self.pending = Some(idx);
        self.needs_repaint = false;

        let first = self.is_first_commit();
        trace!(frame, buffer = idx, first, "frame queued");
        Ok(first)
    }

    /// The commit carrying the pending buffer was accepted.
    ///
    /// `out_fence` signals once the commit took effect, which is when the kernel stops
    /// reading the currently displayed buffer. It is stashed on that buffer.
    pub fn commit_submitted(&mut self, out_fence: Option<FenceHandle>) {
        if let Some(idx) = self.pending {
            // the kernel holds its own reference to the in-fence now
            drop(self.ring.get_mut(idx).take_render_fence());
        }
        if let (Some(fence), Some(displayed)) = (out_fence, self.displayed) {
            self.ring.get_mut(displayed).set_display_fence(fence);
        }
    }

    /// Drop the buffer appended by the last [`repaint`](Output::repaint) without a commit.
    ///
    /// The buffer returns to the ring and the output stays due.
    pub fn cancel_pending(&mut self) {
        if let Some(idx) = self.pending.take() {
            self.ring.get_mut(idx).abort_commit();
        }
        self.needs_repaint = true;
    }

    /// The commit carrying the pending buffer was rejected.
    ///
    /// The buffer returns to the ring. The output is not due until [`retry`](Output::retry)
    /// is called, which the event loop does one refresh cycle later.
    pub fn commit_failed(&mut self) {
        self.cancel_pending();
        self.needs_repaint = false;
        debug!(parent: &self.span, "commit rejected, holding output for one refresh cycle");
    }

    /// Make an output held back after a rejected commit due again
    pub fn retry(&mut self) {
        if self.pending.is_none() {
            self.needs_repaint = true;
        }
    }

    /// Apply a completion event of this output's crtc.
    ///
    /// Returns `false` if no commit was pending, in which case nothing changes.
    #[profiling::function]
    pub fn commit_completed(&mut self, time: Time<Monotonic>) -> bool {
        let _guard = self.span.enter();
        let Some(idx) = self.pending.take() else {
            warn!(?time, "completion event without a pending commit");
            return false;
        };

        self.ring.get_mut(idx).mark_displayed();
        if let Some(previous) = self.displayed.replace(idx) {
            self.ring.release(previous);
            // the out-fence of this very commit sits on the buffer it replaced
            if let Some(fence) = self.ring.get(previous).display_fence() {
                match fence.completion_time() {
                    Ok(Some(signaled)) => {
                        trace!(?signaled, event = ?time, skew = ?signaled.abs_diff(time), "display fence")
                    }
                    Ok(None) => trace!("display fence still pending at completion"),
                    Err(err) => trace!(%err, "display fence timestamp unavailable"),
                }
            }
        }
        self.clock.record_completion(time);
        self.needs_repaint = true;
        trace!(buffer = idx, "commit completed");
        true
    }
}

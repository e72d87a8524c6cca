//! Construction of the per-iteration atomic request

use std::cell::Cell;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use drm::control::{crtc, property, AtomicCommitFlags, RawResourceHandle};
use tracing::{error, trace};

use super::device::KmsDevice;
use super::error::CommitError;
use super::output::Output;
use crate::backend::allocator::{Buffer, Image};
use crate::backend::renderer::sync::FenceHandle;

/// A single property write of an atomic request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyWrite {
    /// Object the property belongs to
    pub object: RawResourceHandle,
    /// Property id
    pub property: property::Handle,
    /// Raw value
    pub value: u64,
}

/// Ordered property writes of one commit
///
/// A request is built fresh every loop iteration, submitted once and then dropped.
#[derive(Debug, Default)]
pub struct AtomicRequest {
    writes: Vec<PropertyWrite>,
    // The kernel writes the out-fence descriptor through a pointer to these slots,
    // boxed so the address stays stable while the request is moved around.
    out_fences: Vec<(crtc::Handle, Box<Cell<RawFd>>)>,
}

impl AtomicRequest {
    fn add(&mut self, object: impl Into<RawResourceHandle>, property: property::Handle, value: u64) {
        self.writes.push(PropertyWrite {
            object: object.into(),
            property,
            value,
        });
    }

    fn add_optional(
        &mut self,
        object: impl Into<RawResourceHandle>,
        property: Option<property::Handle>,
        value: u64,
    ) {
        if let Some(property) = property {
            self.add(object, property, value);
        }
    }

    /// All writes in submission order
    pub fn writes(&self) -> &[PropertyWrite] {
        &self.writes
    }

    /// Returns `true` if no write was added
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Value written to `property` of `object`, if any
    pub fn value_of(&self, object: impl Into<RawResourceHandle>, property: property::Handle) -> Option<u64> {
        let object = object.into();
        self.writes
            .iter()
            .find(|w| w.object == object && w.property == property)
            .map(|w| w.value)
    }

    #[cfg(test)]
    pub(crate) fn from_writes(writes: Vec<PropertyWrite>) -> Self {
        AtomicRequest {
            writes,
            out_fences: Vec::new(),
        }
    }

    /// Take the out-fence the kernel returned for `crtc`
    ///
    /// Returns `None` if no out-fence was requested for the crtc or the commit did not produce one.
    pub fn take_out_fence(&mut self, crtc: crtc::Handle) -> Option<FenceHandle> {
        let (_, slot) = self.out_fences.iter().find(|(c, _)| *c == crtc)?;
        let fd = slot.replace(-1);
        if fd < 0 {
            return None;
        }
        // SAFETY: the kernel hands us ownership of the newly created sync_file
        Some(FenceHandle::from(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    fn dump(&self) {
        for write in &self.writes {
            error!(object = ?write.object, property = ?write.property, value = write.value, "  property");
        }
    }
}

impl Drop for AtomicRequest {
    fn drop(&mut self) {
        // out-fences nobody took are closed here
        for (_, slot) in &self.out_fences {
            let fd = slot.replace(-1);
            if fd >= 0 {
                drop(unsafe { OwnedFd::from_raw_fd(fd) });
            }
        }
    }
}

/// Accumulates the state of all due outputs into one commit
#[derive(Debug, Default)]
pub struct AtomicRequestBuilder {
    request: AtomicRequest,
    outputs: Vec<crtc::Handle>,
}

impl AtomicRequestBuilder {
    /// Start an empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the state displaying `buffer` on `output`
    ///
    /// Writes of properties the kernel does not advertise are skipped.
    #[profiling::function]
    pub fn add_output_state<I: Image>(&mut self, output: &Output<I>, buffer: &Buffer<I>) {
        let props = output.properties();
        let plane = output.plane();
        let crtc = output.crtc();
        let (width, height) = buffer.image().size();
        let (mode_w, mode_h) = output.mode_size();

        let req = &mut self.request;
        req.add(plane, props.plane.crtc_id, u32::from(crtc) as u64);
        req.add(plane, props.plane.fb_id, u32::from(buffer.image().framebuffer()) as u64);
        req.add(plane, props.plane.src_x, 0);
        req.add(plane, props.plane.src_y, 0);
        req.add(plane, props.plane.src_w, to_fixed(width));
        req.add(plane, props.plane.src_h, to_fixed(height));
        req.add(plane, props.plane.crtc_x, 0);
        req.add(plane, props.plane.crtc_y, 0);
        req.add(plane, props.plane.crtc_w, mode_w as u64);
        req.add(plane, props.plane.crtc_h, mode_h as u64);

        if output.explicit_fencing() {
            if let Some(fence) = buffer.render_fence() {
                req.add_optional(plane, props.plane.in_fence_fd, fence.as_raw_fd() as u64);
            }
        }

        req.add(crtc, props.crtc.mode_id, output.mode_blob());
        req.add(crtc, props.crtc.active, 1);
        if output.explicit_fencing() {
            if let Some(out_fence_ptr) = props.crtc.out_fence_ptr {
                let slot = Box::new(Cell::new(-1));
                req.add(crtc, out_fence_ptr, slot.as_ptr() as u64);
                req.out_fences.push((crtc, slot));
            }
        }

        req.add(output.connector(), props.connector.crtc_id, u32::from(crtc) as u64);

        trace!(?crtc, fb = ?buffer.image().framebuffer(), "appended output state");
        self.outputs.push(crtc);
    }

    /// The request accumulated so far
    pub fn request(&self) -> &AtomicRequest {
        &self.request
    }

    /// Crtcs of all outputs appended so far
    pub fn outputs(&self) -> &[crtc::Handle] {
        &self.outputs
    }

    /// Returns `true` if no output was appended
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Issue one non-blocking commit carrying all appended output states
    ///
    /// `allow_modeset` must only be set for the first commit of an output. On success the
    /// request is returned so the out-fences can be collected.
    #[profiling::function]
    pub fn submit<D: KmsDevice + ?Sized>(
        self,
        device: &D,
        allow_modeset: bool,
    ) -> Result<AtomicRequest, CommitError> {
        let mut flags = AtomicCommitFlags::NONBLOCK | AtomicCommitFlags::PAGE_FLIP_EVENT;
        if allow_modeset {
            flags |= AtomicCommitFlags::ALLOW_MODESET;
        }

        match device.commit(&self.request, flags) {
            Ok(()) => {
                trace!(?flags, outputs = ?self.outputs, "commit submitted");
                Ok(self.request)
            }
            Err(source) => {
                error!(?flags, outputs = ?self.outputs, %source, "atomic commit rejected, request was:");
                self.request.dump();
                Err(CommitError::Rejected { flags, source })
            }
        }
    }
}

/// Convert an integer pixel size to the 16.16 fixed point format of the plane source properties
pub(crate) fn to_fixed(n: u32) -> u64 {
    (n as u64) << 16
}

//! Atomic modesetting pipeline
//!
//! This module drives one or more outputs of a kms device through nonblocking atomic
//! commits, one frame per refresh cycle.
//!
//! ## Structure
//!
//! - [`DrmDevice`] opens the device node and checks the required capabilities.
//! - [`enumerate::active_outputs`] finds the connectors currently lit up and resolves the
//!   property ids of their connector, crtc and primary plane.
//! - An [`Output`] owns a [`BufferRing`](crate::backend::allocator::BufferRing) and a
//!   [`FrameClock`] predicting the completion time of the next commit.
//! - The [`AtomicRequestBuilder`] collects the state of all due outputs into a single commit.
//! - The [`Adapter`] ties everything together and runs the event loop.
//!
//! ## Fencing
//!
//! If the kernel exposes `IN_FENCE_FD` and `OUT_FENCE_PTR` and the renderer returns fences,
//! no CPU wait happens anywhere. The render fence is handed to the kernel with the commit and
//! the returned out-fence tells when the previously displayed buffer may be drawn into again.
//! Otherwise render fences are dropped and the kernel's implicit sync orders scanout after
//! the GPU writes.
//!
//! ## Example
//!
//! ```rust,no_run
//! # #[cfg(feature = "backend_gbm")]
//! # fn run<R>(renderer: R) -> Result<(), Box<dyn std::error::Error>>
//! # where R: glplay::backend::renderer::Renderer<Image = glplay::backend::allocator::gbm::GbmImage>
//! # {
//! use glplay::backend::allocator::gbm::GbmAllocator;
//! use glplay::backend::drm::{enumerate, Adapter, AdapterConfig, DrmDevice};
//!
//! let device = DrmDevice::open_default()?;
//! let config = AdapterConfig::default();
//! let mut allocator = GbmAllocator::new(&device)?;
//! let outputs = enumerate::active_outputs(&device)?
//!     .into_iter()
//!     .map(|target| enumerate::create_output(&device, target, &mut allocator, &config))
//!     .collect::<Result<Vec<_>, _>>()?;
//!
//! let mut adapter = Adapter::new(device, renderer, outputs, &config)?;
//! adapter.run()?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod atomic;
mod device;
pub mod enumerate;
pub mod error;
pub mod frame_clock;
pub mod output;

pub use adapter::{Adapter, AdapterConfig, AdapterError};
pub use atomic::{AtomicRequest, AtomicRequestBuilder, PropertyWrite};
pub use device::{props, CompletionEvent, DrmDevice, DrmDeviceFd, KmsDevice};
pub use error::{AccessError, CommitError, Error};
pub use frame_clock::FrameClock;
pub use output::{ModeBlob, Output, OutputSetup};

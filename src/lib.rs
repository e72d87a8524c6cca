#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # glplay: an atomic KMS output repaint pipeline
//!
//! This crate drives one or more display outputs through the kernel's atomic modesetting API.
//! Each output renders into a small ring of GBM-backed buffers, hands finished buffers to the
//! display hardware with a single non-blocking commit per loop iteration, and only reuses a
//! buffer once the kernel reported that a later one replaced it on screen.
//!
//! ## Structure of the crate
//!
//! - [`backend::allocator`] contains the buffer model: [`Buffer`](backend::allocator::Buffer) with
//!   its use-state and fence slots, the per-output [`BufferRing`](backend::allocator::BufferRing)
//!   and a GBM allocator producing scanout capable images.
//! - [`backend::drm`] contains everything talking to the kernel: device setup, property
//!   resolution, the [`AtomicRequestBuilder`](backend::drm::AtomicRequestBuilder), per-output
//!   [`FrameClock`](backend::drm::FrameClock) pacing, the [`Output`](backend::drm::Output) state
//!   machine and the [`Adapter`](backend::drm::Adapter) event loop.
//! - [`backend::renderer`] defines the seam to a GPU renderer and the dma-fence wrapper
//!   [`FenceHandle`](backend::renderer::sync::FenceHandle).
//!
//! ### The event loop
//!
//! The [`Adapter`](backend::drm::Adapter) is built around [`calloop`]. The device descriptor and
//! `SIGINT` are registered as event sources; every iteration renders the outputs that are due,
//! submits one combined commit and then blocks until the kernel reports completion.
//!
//! ### Logging
//!
//! glplay makes extensive use of [`tracing`] for its internal logging.
//!
//! For release builds it is recommended to limit the log level during compile time.
//! This can be done by adding a dependency to [`tracing`] and enabling the corresponding features.
//! For example to enable `trace` messages for debug builds, but limit release builds to `debug` add
//! the following in your binary crate `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! tracing = { version = "0.1", features = ["max_level_trace", "release_max_level_debug"] }
//! ```

pub mod backend;
pub mod utils;

pub mod reexports;

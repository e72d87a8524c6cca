//! Backend helpers
//!
//! Collection of the types and traits driving kernel display outputs:
//!
//! - [`allocator`]: scanout buffers, their use-state and the per-output ring
//! - [`drm`]: kernel device access, atomic commits, frame pacing and the event loop
//! - [`renderer`]: the interface to a GPU renderer and fence handling

pub mod allocator;
pub mod drm;
pub mod renderer;

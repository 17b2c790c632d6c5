//! CPU-written memory that the GPU reads within a frame or two.

mod fast_allocator;
pub mod ring;

pub use fast_allocator::{FastAllocator, UploadAllocation};
pub use ring::{RingAllocator, RingError};

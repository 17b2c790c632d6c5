//! Small containers shared by the RHI crates.
//!
//! Nothing in here knows about GPUs; the types are sized and indexed the way
//! descriptor heaps and per-node arrays want them.

pub mod bitset;
pub mod slot_allocator;

pub use bitset::FixedBitSet;
pub use slot_allocator::{SlotAllocator, SlotError};

//! Descriptor heaps, samplers, views and the subresources views cover.

mod heap;
mod online;
mod sampler;
pub mod subresource;
mod view;
pub mod view_desc;

pub use heap::{
    heap_capacity, DescriptorHeapAllocator, DescriptorHeapKind, DescriptorSlot,
    ResourceBindingTier, NUM_DSV_DESCRIPTORS, NUM_RTV_DESCRIPTORS, NUM_SAMPLER_DESCRIPTORS,
    NUM_VIEW_DESCRIPTORS_TIER_1, NUM_VIEW_DESCRIPTORS_TIER_2, NUM_VIEW_DESCRIPTORS_TIER_3,
};
pub use online::OnlineDescriptorRing;
pub use sampler::{AddressMode, Filter, Sampler, SamplerCache, SamplerDesc};
pub use subresource::{SubresourceLayout, SubresourceSubset, ViewSubresourceSubset};
pub use view::{View, ViewKind};
pub use view_desc::ViewDesc;

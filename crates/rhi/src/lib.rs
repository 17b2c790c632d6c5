//! A render hardware interface over D3D12-style GPUs.
//!
//! ## Goals
//!
//! - Drive one or more linked GPU nodes from a single [`Adapter`], with
//!   alternate frame rendering across nodes.
//! - Keep command recording cheap: contexts cache state and only write what
//!   changed, command lists and allocators are recycled against fences.
//! - Never compile the same pipeline state twice, across runs included.
//! - Never free anything the GPU may still be reading.
//!
//! ## Layout
//!
//! Everything that talks to the driver goes through the [`backend::Backend`]
//! trait. [`backend::null::NullBackend`] runs the whole crate on the CPU and
//! is what the tests use; `backend::dx12` maps it onto D3D12 on Windows.
//!
//! Leaves first: [`Fence`] and [`DeferredDeletionQueue`], descriptor heaps,
//! command allocators and lists, [`CommandContext`], [`PipelineStateCache`],
//! [`Device`], [`Adapter`].

pub mod adapter;
pub mod backend;
pub mod command;
pub mod config;
pub mod debug;
pub mod deferred_deletion;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod fence;
pub mod format;
pub mod memory;
pub mod node;
pub mod pipeline;
pub mod resource;
pub mod temporal;

pub use adapter::{Adapter, AdapterShared};
pub use command::{CommandContext, CommandContextRedirector, ContextKind, WorkCounters};
pub use config::{BatchingMode, MultiGpuMode, PowerPreference, PsoCacheConfig, RhiConfig};
pub use deferred_deletion::{DeferredDeletionQueue, DeferredObject};
pub use descriptor::{Sampler, SamplerDesc, View, ViewKind};
pub use device::{Device, DeviceCore};
pub use error::{FatalPolicy, RhiError, RhiResult};
pub use fence::Fence;
pub use format::Format;
pub use node::{GpuNodeMask, LinkedObject, NodeIndex, MAX_NUM_GPUS};
pub use pipeline::{PipelineState, PipelineStateCache};
pub use resource::{
    Buffer, BufferDesc, LockMode, Resource, Texture, TextureLock, UniformBuffer, UniformBufferUsage,
};
pub use temporal::TemporalEffect;

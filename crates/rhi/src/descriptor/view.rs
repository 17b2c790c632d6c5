use std::{fmt, sync::Arc};

use parking_lot::RwLock;

use super::{
    DescriptorHeapAllocator, DescriptorHeapKind, DescriptorSlot, SubresourceLayout, ViewDesc,
    ViewSubresourceSubset,
};
use crate::{
    backend::{Backend, DescriptorHandle},
    deferred_deletion::{DeferredDeletionQueue, DeferredObject},
    error::RhiResult,
    resource::Resource,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
    DepthStencil,
    UnorderedAccess,
    ConstantBuffer,
}

impl ViewKind {
    #[must_use]
    pub fn of(desc: &ViewDesc) -> Self {
        match desc {
            ViewDesc::Srv(_) => Self::ShaderResource,
            ViewDesc::Rtv(_) => Self::RenderTarget,
            ViewDesc::Dsv(_) => Self::DepthStencil,
            ViewDesc::Uav(_) => Self::UnorderedAccess,
            ViewDesc::Cbv(_) => Self::ConstantBuffer,
        }
    }

    /// The CPU heap descriptors of this kind live in.
    #[must_use]
    pub fn heap_kind(self) -> DescriptorHeapKind {
        match self {
            Self::RenderTarget => DescriptorHeapKind::RenderTarget,
            Self::DepthStencil => DescriptorHeapKind::DepthStencil,
            Self::ShaderResource | Self::UnorderedAccess | Self::ConstantBuffer => DescriptorHeapKind::View,
        }
    }
}

struct Binding {
    resource: Arc<Resource>,
    subset: ViewSubresourceSubset,
}

/// A descriptor viewing (part of) a resource.
///
/// The view remembers which subresources it covers so that overlapping reads
/// and writes can be detected. When the underlying resource is replaced
/// (aliasing, reallocation), [`View::rebind`] rewrites the descriptor and
/// recomputes the covered subresources.
///
/// The descriptor slot is handed to deferred deletion on drop, since commands
/// in flight may still reference it.
pub struct View {
    kind: ViewKind,
    desc: ViewDesc,
    handle: DescriptorHandle,
    slot: Option<DescriptorSlot>,
    binding: RwLock<Binding>,
    deletion: Arc<DeferredDeletionQueue>,
}

impl View {
    pub fn new(
        backend: &dyn Backend,
        heap: &Arc<DescriptorHeapAllocator>,
        desc: ViewDesc,
        resource: Arc<Resource>,
        deletion: Arc<DeferredDeletionQueue>,
    ) -> RhiResult<Self> {
        let kind = ViewKind::of(&desc);
        debug_assert_eq!(heap.kind(), kind.heap_kind());

        let slot = heap.allocate()?;
        slot.write_view(backend, &desc, Some(&**resource.native()));

        let subset = ViewSubresourceSubset::from_view(&desc, SubresourceLayout::of(resource.desc()));

        Ok(Self {
            kind,
            desc,
            handle: slot.handle(),
            slot: Some(slot),
            binding: RwLock::new(Binding { resource, subset }),
            deletion,
        })
    }

    #[must_use]
    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    #[must_use]
    pub fn desc(&self) -> &ViewDesc {
        &self.desc
    }

    #[must_use]
    pub fn handle(&self) -> &DescriptorHandle {
        &self.handle
    }

    #[must_use]
    pub fn resource(&self) -> Arc<Resource> {
        self.binding.read().resource.clone()
    }

    #[must_use]
    pub fn subset(&self) -> ViewSubresourceSubset {
        self.binding.read().subset
    }

    /// Points the view at `resource`, rewriting the descriptor in place.
    pub fn rebind(&self, backend: &dyn Backend, resource: Arc<Resource>) {
        let mut binding = self.binding.write();
        backend.write_view(&*self.handle.heap, self.handle.index, &self.desc, Some(&**resource.native()));
        binding.subset = ViewSubresourceSubset::from_view(&self.desc, SubresourceLayout::of(resource.desc()));
        binding.resource = resource;
    }

    /// Whether the two views can never touch the same subresource.
    #[must_use]
    pub fn does_not_overlap(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return false;
        }

        let a = self.binding.read();
        let b = other.binding.read();
        !Arc::ptr_eq(a.resource.native(), b.resource.native()) || a.subset.does_not_overlap(&b.subset)
    }
}

impl Drop for View {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.deletion.enqueue(DeferredObject::Descriptor(slot));
        }
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("View")
            .field("kind", &self.kind)
            .field("handle", &self.handle)
            .field("subset", &self.subset())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::null::NullBackend,
        descriptor::view_desc::{RtvDesc, RtvDimension, SrvDesc, SrvDimension},
        fence::Fence,
        format::Format,
        node::{GpuNodeMask, NodeIndex},
        resource::desc::{HeapType, ResourceDesc, ResourceFlags, ResourceState},
    };

    struct Fixture {
        backend: NullBackend,
        srv_heap: Arc<DescriptorHeapAllocator>,
        rtv_heap: Arc<DescriptorHeapAllocator>,
        deletion: Arc<DeferredDeletionQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = NullBackend::new(1);
            let srv_heap = DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::View, 8).unwrap();
            let rtv_heap =
                DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::RenderTarget, 8).unwrap();
            let fence = Arc::new(Fence::new(&backend, "frame", GpuNodeMask::first_n(1), 0).unwrap());
            Self {
                backend,
                srv_heap,
                rtv_heap,
                deletion: Arc::new(DeferredDeletionQueue::new(fence)),
            }
        }

        fn texture(&self, mip_levels: u32) -> Arc<Resource> {
            let desc = ResourceDesc::texture_2d(
                64,
                64,
                1,
                mip_levels,
                Format::R8G8B8A8Unorm,
                ResourceFlags::ALLOW_RENDER_TARGET,
            );
            let native = self
                .backend
                .create_resource(&desc, HeapType::Default, NodeIndex::ZERO, GpuNodeMask::first_n(1), ResourceState::COMMON, "texture")
                .unwrap();
            Resource::new(
                native,
                HeapType::Default,
                NodeIndex::ZERO,
                GpuNodeMask::first_n(1),
                ResourceState::COMMON,
                "texture".into(),
                self.deletion.clone(),
            )
        }

        fn srv(&self, resource: Arc<Resource>) -> View {
            let desc = ViewDesc::Srv(SrvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: SrvDimension::Texture2D {
                    most_detailed_mip: 0,
                    mip_levels: u32::MAX,
                    plane_slice: 0,
                },
            });
            View::new(&self.backend, &self.srv_heap, desc, resource, self.deletion.clone()).unwrap()
        }

        fn rtv(&self, resource: Arc<Resource>, mip_slice: u32) -> View {
            let desc = ViewDesc::Rtv(RtvDesc {
                format: Format::R8G8B8A8Unorm,
                dimension: RtvDimension::Texture2D {
                    mip_slice,
                    plane_slice: 0,
                },
            });
            View::new(&self.backend, &self.rtv_heap, desc, resource, self.deletion.clone()).unwrap()
        }
    }

    #[test]
    fn views_of_different_resources_never_overlap() {
        let fixture = Fixture::new();
        let a = fixture.srv(fixture.texture(1));
        let b = fixture.rtv(fixture.texture(1), 0);

        assert!(a.does_not_overlap(&b));
        assert!(b.does_not_overlap(&a));
        assert!(!a.does_not_overlap(&a));
    }

    #[test]
    fn mip_slices_of_one_resource() {
        let fixture = Fixture::new();
        let texture = fixture.texture(4);
        let whole = fixture.srv(texture.clone());
        let mip0 = fixture.rtv(texture.clone(), 0);
        let mip2 = fixture.rtv(texture, 2);

        assert!(whole.subset().is_whole_resource());
        assert!(!whole.does_not_overlap(&mip2));
        assert!(mip0.does_not_overlap(&mip2));
    }

    #[test]
    fn rebind_recomputes_the_subset() {
        let fixture = Fixture::new();
        let view = fixture.srv(fixture.texture(1));
        assert_eq!(view.subset().subset().mip_count(), 1);

        let replacement = fixture.texture(5);
        view.rebind(&fixture.backend, replacement.clone());

        assert!(Arc::ptr_eq(&view.resource(), &replacement));
        assert_eq!(view.subset().subset().mip_count(), 5);
        assert!(view.subset().is_whole_resource());
    }

    #[test]
    fn dropped_views_release_their_slot_later() {
        let fixture = Fixture::new();
        let view = fixture.srv(fixture.texture(1));
        assert_eq!(fixture.srv_heap.len(), 1);

        drop(view);
        assert_eq!(fixture.srv_heap.len(), 1);
        assert_eq!(fixture.deletion.len(), 2);

        fixture.deletion.release_all_blocking().unwrap();
        assert_eq!(fixture.srv_heap.len(), 0);
    }
}

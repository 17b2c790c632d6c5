use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};

use super::{
    desc::{
        HeapType, PlacedFootprint, ResourceDesc, ResourceDimension, ResourceFlags, ResourceState,
        ALL_SUBRESOURCES, TEXTURE_DATA_PLACEMENT_ALIGNMENT,
    },
    Resource,
};
use crate::{
    adapter::Adapter,
    backend::{Backend, NativeResource, TextureCopyLocation},
    descriptor::{
        view_desc::{
            DsvDesc, DsvDimension, DsvFlags, RtvDesc, RtvDimension, SrvDesc, SrvDimension, UavDesc,
            UavDimension,
        },
        DescriptorHeapKind, View, ViewDesc,
    },
    device::DeviceCore,
    error::{RhiError, RhiResult},
    format::Format,
    node::{LinkedObject, NodeIndex},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// The subresource is copied back to the CPU before the lock returns.
    ReadOnly,
    /// The CPU fills staging memory that is copied into the texture on
    /// unlock.
    WriteOnly,
}

/// The texture on one node, with the default views its flags allow.
pub struct TextureNode {
    resource: RwLock<Arc<Resource>>,
    srv: Option<Arc<View>>,
    rtv: Option<Arc<View>>,
    dsv: Option<Arc<View>>,
    uav: Option<Arc<View>>,
}

impl TextureNode {
    fn new(core: &DeviceCore, resource: Arc<Resource>) -> RhiResult<Self> {
        let desc = *resource.desc();
        let backend = &**core.backend();

        let view = |view_desc: Option<ViewDesc>, heap: DescriptorHeapKind| -> RhiResult<Option<Arc<View>>> {
            view_desc
                .map(|view_desc| {
                    View::new(backend, core.heap(heap), view_desc, resource.clone(), core.deletion().clone())
                        .map(Arc::new)
                })
                .transpose()
        };

        let srv = view(default_srv(&desc), DescriptorHeapKind::View)?;
        let rtv = view(default_rtv(&desc), DescriptorHeapKind::RenderTarget)?;
        let dsv = view(default_dsv(&desc), DescriptorHeapKind::DepthStencil)?;
        let uav = view(default_uav(&desc), DescriptorHeapKind::View)?;

        Ok(Self {
            resource: RwLock::new(resource),
            srv,
            rtv,
            dsv,
            uav,
        })
    }

    #[must_use]
    pub fn resource(&self) -> Arc<Resource> {
        self.resource.read().clone()
    }

    #[must_use]
    pub fn srv(&self) -> Option<&Arc<View>> {
        self.srv.as_ref()
    }

    #[must_use]
    pub fn rtv(&self) -> Option<&Arc<View>> {
        self.rtv.as_ref()
    }

    #[must_use]
    pub fn dsv(&self) -> Option<&Arc<View>> {
        self.dsv.as_ref()
    }

    #[must_use]
    pub fn uav(&self) -> Option<&Arc<View>> {
        self.uav.as_ref()
    }

    pub fn views(&self) -> impl Iterator<Item = &Arc<View>> {
        [&self.srv, &self.rtv, &self.dsv, &self.uav]
            .into_iter()
            .filter_map(Option::as_ref)
    }

    fn rebind(&self, backend: &dyn Backend, resource: Arc<Resource>) {
        let mut current = self.resource.write();
        for view in self.views() {
            view.rebind(backend, resource.clone());
        }
        *current = resource;
    }
}

impl fmt::Debug for TextureNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureNode")
            .field("resource", &*self.resource.read())
            .field("views", &self.views().count())
            .finish()
    }
}

struct PendingLock {
    mode: LockMode,
    footprint: PlacedFootprint,
    memory: Arc<dyn NativeResource>,
    /// Owns the staging buffer until the lock ends. Dropping it hands the
    /// buffer to deferred deletion, after any unlock copies are recorded.
    _staging: Arc<Resource>,
}

/// A texture with a copy on every active node.
pub struct Texture {
    desc: ResourceDesc,
    name: String,
    default_state: ResourceState,
    chain: LinkedObject<TextureNode>,
    locks: Mutex<HashMap<u32, PendingLock>>,
}

impl Texture {
    #[must_use]
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn default_state(&self) -> ResourceState {
        self.default_state
    }

    #[must_use]
    pub fn chain(&self) -> &LinkedObject<TextureNode> {
        &self.chain
    }

    #[must_use]
    pub fn node(&self, node: NodeIndex) -> Option<&TextureNode> {
        self.chain.get(node)
    }

    /// Whether any subresource is currently locked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        !self.locks.lock().is_empty()
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("nodes", &self.chain.node_mask())
            .finish()
    }
}

/// CPU access to one locked subresource.
pub struct TextureLock {
    mode: LockMode,
    subresource: u32,
    footprint: PlacedFootprint,
    memory: Arc<dyn NativeResource>,
}

impl TextureLock {
    #[must_use]
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    #[must_use]
    pub fn subresource(&self) -> u32 {
        self.subresource
    }

    #[must_use]
    pub fn footprint(&self) -> &PlacedFootprint {
        &self.footprint
    }

    /// The distance in bytes between the starts of two rows.
    #[must_use]
    pub fn row_pitch(&self) -> u32 {
        self.footprint.row_pitch
    }

    /// Writes raw bytes at `offset` from the start of the subresource.
    pub fn write(&self, offset: u64, data: &[u8]) -> RhiResult<()> {
        if self.mode != LockMode::WriteOnly {
            return Err(RhiError::InvalidState("write through a read-only texture lock"));
        }
        self.memory.write(self.footprint.offset + offset, data)
    }

    /// Writes tightly packed rows, spreading them out to the row pitch.
    pub fn write_rows(&self, data: &[u8]) -> RhiResult<()> {
        if self.mode != LockMode::WriteOnly {
            return Err(RhiError::InvalidState("write through a read-only texture lock"));
        }
        write_rows(&*self.memory, &self.footprint, data)
    }

    /// Reads raw bytes at `offset` from the start of the subresource.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> RhiResult<()> {
        if self.mode != LockMode::ReadOnly {
            return Err(RhiError::InvalidState("read through a write-only texture lock"));
        }
        self.memory.read(self.footprint.offset + offset, out)
    }

    /// Reads the subresource as tightly packed rows.
    pub fn read_rows(&self) -> RhiResult<Vec<u8>> {
        if self.mode != LockMode::ReadOnly {
            return Err(RhiError::InvalidState("read through a write-only texture lock"));
        }

        let row_size = self.footprint.row_size() as usize;
        let rows = self.footprint.row_count() * self.footprint.depth;
        let mut out = vec![0; row_size * rows as usize];

        for (row, chunk) in out.chunks_mut(row_size).enumerate() {
            self.memory
                .read(self.footprint.offset + row as u64 * u64::from(self.footprint.row_pitch), chunk)?;
        }
        Ok(out)
    }
}

impl fmt::Debug for TextureLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextureLock")
            .field("mode", &self.mode)
            .field("subresource", &self.subresource)
            .field("footprint", &self.footprint)
            .finish()
    }
}

impl Adapter {
    /// Creates a texture on every active node. `initial_data` holds every
    /// subresource in index order, each with tightly packed rows.
    pub fn create_texture(
        &self,
        desc: &ResourceDesc,
        name: &str,
        initial_data: Option<&[u8]>,
    ) -> RhiResult<Texture> {
        if desc.is_buffer() {
            return Err(RhiError::InvalidState("create_texture called with a buffer description"));
        }

        let (footprints, staging_size) = desc.copyable_footprints(0);
        if let Some(data) = initial_data {
            let packed: u64 = footprints.iter().map(packed_size).sum();
            if (data.len() as u64) < packed {
                return Err(RhiError::InvalidState("initial data smaller than the texture"));
            }
        }

        let default_state = texture_default_state(desc.flags);

        let chain = self.create_linked_object(|node| {
            let device = self.device_for(node)?;
            let core = device.core();
            let resource = core.create_resource(desc, HeapType::Default, default_state, name)?;

            if let Some(data) = initial_data {
                let staging = core
                    .fast_allocator()
                    .allocate(staging_size, TEXTURE_DATA_PLACEMENT_ALIGNMENT)?;

                let mut context = device.default_context().lock();
                context.transition_resource(
                    resource.native(),
                    ALL_SUBRESOURCES,
                    default_state,
                    ResourceState::COPY_DEST,
                );

                let mut consumed = 0;
                for (index, footprint) in footprints.iter().enumerate() {
                    let footprint = PlacedFootprint {
                        offset: staging.offset + footprint.offset,
                        ..*footprint
                    };
                    let size = packed_size(&footprint) as usize;
                    write_rows(&*staging.resource, &footprint, &data[consumed..consumed + size])?;
                    consumed += size;

                    context.copy_texture_region(
                        TextureCopyLocation::Subresource {
                            resource: resource.native().clone(),
                            index: index as u32,
                        },
                        TextureCopyLocation::Footprint {
                            resource: staging.resource.clone(),
                            footprint,
                        },
                    );
                }

                context.transition_resource(
                    resource.native(),
                    ALL_SUBRESOURCES,
                    ResourceState::COPY_DEST,
                    default_state,
                );
            }

            TextureNode::new(core, resource)
        })?;

        Ok(Texture {
            desc: *desc,
            name: name.to_owned(),
            default_state,
            chain,
            locks: Mutex::default(),
        })
    }

    /// Maps one subresource for CPU access.
    ///
    /// Read locks copy the head node's subresource back and wait for the GPU
    /// before returning. Write locks get their own upload buffer, which is
    /// copied to every node on [`Adapter::unlock_texture`] and stays alive
    /// however many frames the lock is held.
    pub fn lock_texture(
        &self,
        texture: &Texture,
        mip: u32,
        array_slice: u32,
        mode: LockMode,
    ) -> RhiResult<TextureLock> {
        let desc = &texture.desc;
        if mip >= desc.mip_levels || array_slice >= desc.array_size() {
            return Err(RhiError::InvalidState("locked subresource out of range"));
        }

        let subresource = desc.subresource_index(mip, array_slice, 0);
        let mut locks = texture.locks.lock();
        if locks.contains_key(&subresource) {
            return Err(RhiError::InvalidState("subresource is already locked"));
        }

        let head = texture.chain.head_node();
        let device = self.device_for(head)?;

        let pending = match mode {
            LockMode::WriteOnly => {
                let footprint = desc.copyable_footprint(subresource, 0);
                let upload = device.core().create_resource(
                    &ResourceDesc::buffer(footprint.size(), ResourceFlags::empty()),
                    HeapType::Upload,
                    ResourceState::GENERIC_READ,
                    "texture lock upload",
                )?;
                PendingLock {
                    mode,
                    footprint,
                    memory: upload.native().clone(),
                    _staging: upload,
                }
            }
            LockMode::ReadOnly => {
                let footprint = desc.copyable_footprint(subresource, 0);
                let readback = device.core().create_resource(
                    &ResourceDesc::buffer(footprint.size(), ResourceFlags::empty()),
                    HeapType::Readback,
                    ResourceState::COPY_DEST,
                    "texture readback",
                )?;

                let source = texture.chain.head().resource();
                let mut context = device.default_context().lock();
                context.transition_resource(
                    source.native(),
                    subresource,
                    texture.default_state,
                    ResourceState::COPY_SOURCE,
                );
                context.copy_texture_region(
                    TextureCopyLocation::Footprint {
                        resource: readback.native().clone(),
                        footprint,
                    },
                    TextureCopyLocation::Subresource {
                        resource: source.native().clone(),
                        index: subresource,
                    },
                );
                context.transition_resource(
                    source.native(),
                    subresource,
                    ResourceState::COPY_SOURCE,
                    texture.default_state,
                );
                context.flush_commands(true)?;

                PendingLock {
                    mode,
                    footprint,
                    memory: readback.native().clone(),
                    _staging: readback,
                }
            }
        };

        let lock = TextureLock {
            mode,
            subresource,
            footprint: pending.footprint,
            memory: pending.memory.clone(),
        };
        locks.insert(subresource, pending);
        Ok(lock)
    }

    /// Ends a lock. Written data is copied into the texture on every node.
    pub fn unlock_texture(&self, texture: &Texture, mip: u32, array_slice: u32) -> RhiResult<()> {
        let subresource = texture.desc.subresource_index(mip, array_slice, 0);
        let pending = texture
            .locks
            .lock()
            .remove(&subresource)
            .ok_or(RhiError::InvalidState("subresource is not locked"))?;

        if pending.mode == LockMode::ReadOnly {
            return Ok(());
        }

        for (node, texture_node) in texture.chain.iter() {
            let device = self.device_for(node)?;
            let resource = texture_node.resource();
            let mut context = device.default_context().lock();

            context.transition_resource(
                resource.native(),
                subresource,
                texture.default_state,
                ResourceState::COPY_DEST,
            );
            context.copy_texture_region(
                TextureCopyLocation::Subresource {
                    resource: resource.native().clone(),
                    index: subresource,
                },
                TextureCopyLocation::Footprint {
                    resource: pending.memory.clone(),
                    footprint: pending.footprint,
                },
            );
            context.transition_resource(
                resource.native(),
                subresource,
                ResourceState::COPY_DEST,
                texture.default_state,
            );
        }
        Ok(())
    }

    /// Points `dest` and its views at the resources of `src`, node by node.
    pub fn alias_texture_resources(&self, dest: &Texture, src: &Texture) -> RhiResult<()> {
        if dest.chain.node_mask() != src.chain.node_mask() {
            return Err(RhiError::InvalidState("aliased textures live on different nodes"));
        }

        for ((_, dest_node), (_, src_node)) in dest.chain.iter().zip(src.chain.iter()) {
            dest_node.rebind(&**self.backend(), src_node.resource());
        }
        Ok(())
    }
}

fn texture_default_state(flags: ResourceFlags) -> ResourceState {
    if flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
        ResourceState::DEPTH_WRITE
    } else if flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
        ResourceState::RENDER_TARGET
    } else if flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) {
        ResourceState::UNORDERED_ACCESS
    } else {
        ResourceState::ALL_SHADER_RESOURCE
    }
}

/// The bytes a footprint occupies with rows packed end to end.
fn packed_size(footprint: &PlacedFootprint) -> u64 {
    u64::from(footprint.row_size()) * u64::from(footprint.row_count()) * u64::from(footprint.depth)
}

fn write_rows(memory: &dyn NativeResource, footprint: &PlacedFootprint, data: &[u8]) -> RhiResult<()> {
    let row_size = footprint.row_size() as usize;
    let rows = (footprint.row_count() * footprint.depth) as usize;

    for (row, chunk) in data.chunks(row_size).take(rows).enumerate() {
        memory.write(footprint.offset + row as u64 * u64::from(footprint.row_pitch), chunk)?;
    }
    Ok(())
}

/// The format shader-resource views of a depth format read through.
fn depth_srv_format(format: Format) -> Option<Format> {
    match format {
        Format::D32Float => Some(Format::R32Float),
        Format::D24UnormS8Uint => Some(Format::R24UnormX8Typeless),
        Format::D32FloatS8X24Uint => Some(Format::R32FloatX8X24Typeless),
        Format::D16Unorm => None,
        other => Some(other),
    }
}

fn default_srv(desc: &ResourceDesc) -> Option<ViewDesc> {
    if desc.flags.contains(ResourceFlags::DENY_SHADER_RESOURCE) {
        return None;
    }

    let format = depth_srv_format(desc.format)?;
    let plane_slice = format.view_plane_slice().unwrap_or(0);
    let array_size = desc.array_size();
    let mip_levels = u32::MAX;

    let dimension = match desc.dimension {
        ResourceDimension::Buffer => return None,
        ResourceDimension::Texture1D if array_size > 1 => SrvDimension::Texture1DArray {
            most_detailed_mip: 0,
            mip_levels,
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture1D => SrvDimension::Texture1D {
            most_detailed_mip: 0,
            mip_levels,
        },
        ResourceDimension::Texture2D if desc.sample_count > 1 && array_size > 1 => SrvDimension::Texture2DMsArray {
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture2D if desc.sample_count > 1 => SrvDimension::Texture2DMs,
        ResourceDimension::Texture2D if array_size > 1 => SrvDimension::Texture2DArray {
            most_detailed_mip: 0,
            mip_levels,
            first_array_slice: 0,
            array_size,
            plane_slice,
        },
        ResourceDimension::Texture2D => SrvDimension::Texture2D {
            most_detailed_mip: 0,
            mip_levels,
            plane_slice,
        },
        ResourceDimension::Texture3D => SrvDimension::Texture3D {
            most_detailed_mip: 0,
            mip_levels,
        },
    };

    Some(ViewDesc::Srv(SrvDesc { format, dimension }))
}

fn default_rtv(desc: &ResourceDesc) -> Option<ViewDesc> {
    if !desc.flags.contains(ResourceFlags::ALLOW_RENDER_TARGET) {
        return None;
    }

    let array_size = desc.array_size();
    let dimension = match desc.dimension {
        ResourceDimension::Buffer => return None,
        ResourceDimension::Texture1D if array_size > 1 => RtvDimension::Texture1DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture1D => RtvDimension::Texture1D { mip_slice: 0 },
        ResourceDimension::Texture2D if desc.sample_count > 1 && array_size > 1 => RtvDimension::Texture2DMsArray {
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture2D if desc.sample_count > 1 => RtvDimension::Texture2DMs,
        ResourceDimension::Texture2D if array_size > 1 => RtvDimension::Texture2DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
            plane_slice: 0,
        },
        ResourceDimension::Texture2D => RtvDimension::Texture2D {
            mip_slice: 0,
            plane_slice: 0,
        },
        ResourceDimension::Texture3D => RtvDimension::Texture3D {
            mip_slice: 0,
            first_w_slice: 0,
            w_size: desc.depth(),
        },
    };

    Some(ViewDesc::Rtv(RtvDesc {
        format: desc.format,
        dimension,
    }))
}

fn default_dsv(desc: &ResourceDesc) -> Option<ViewDesc> {
    if !desc.flags.contains(ResourceFlags::ALLOW_DEPTH_STENCIL) {
        return None;
    }

    let array_size = desc.array_size();
    let dimension = match desc.dimension {
        ResourceDimension::Buffer | ResourceDimension::Texture3D => return None,
        ResourceDimension::Texture1D if array_size > 1 => DsvDimension::Texture1DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture1D => DsvDimension::Texture1D { mip_slice: 0 },
        ResourceDimension::Texture2D if desc.sample_count > 1 && array_size > 1 => DsvDimension::Texture2DMsArray {
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture2D if desc.sample_count > 1 => DsvDimension::Texture2DMs,
        ResourceDimension::Texture2D if array_size > 1 => DsvDimension::Texture2DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture2D => DsvDimension::Texture2D { mip_slice: 0 },
    };

    Some(ViewDesc::Dsv(DsvDesc {
        format: desc.format,
        dimension,
        flags: DsvFlags::empty(),
    }))
}

fn default_uav(desc: &ResourceDesc) -> Option<ViewDesc> {
    if !desc.flags.contains(ResourceFlags::ALLOW_UNORDERED_ACCESS) {
        return None;
    }

    let array_size = desc.array_size();
    let dimension = match desc.dimension {
        ResourceDimension::Buffer => return None,
        ResourceDimension::Texture1D if array_size > 1 => UavDimension::Texture1DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
        },
        ResourceDimension::Texture1D => UavDimension::Texture1D { mip_slice: 0 },
        ResourceDimension::Texture2D if array_size > 1 => UavDimension::Texture2DArray {
            mip_slice: 0,
            first_array_slice: 0,
            array_size,
            plane_slice: 0,
        },
        ResourceDimension::Texture2D => UavDimension::Texture2D {
            mip_slice: 0,
            plane_slice: 0,
        },
        ResourceDimension::Texture3D => UavDimension::Texture3D {
            mip_slice: 0,
            first_w_slice: 0,
            w_size: desc.depth(),
        },
    };

    Some(ViewDesc::Uav(UavDesc {
        format: desc.format,
        dimension,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(flags: ResourceFlags, format: Format) -> ResourceDesc {
        ResourceDesc::texture_2d(64, 32, 1, 3, format, flags)
    }

    #[test]
    fn default_views_follow_flags() {
        let color = desc(ResourceFlags::ALLOW_RENDER_TARGET, Format::R8G8B8A8Unorm);
        assert!(default_srv(&color).is_some());
        assert!(default_rtv(&color).is_some());
        assert!(default_dsv(&color).is_none());
        assert!(default_uav(&color).is_none());
        assert_eq!(texture_default_state(color.flags), ResourceState::RENDER_TARGET);

        let hidden = desc(ResourceFlags::DENY_SHADER_RESOURCE, Format::R8G8B8A8Unorm);
        assert!(default_srv(&hidden).is_none());
    }

    #[test]
    fn depth_textures_are_sampled_through_their_depth_plane() {
        let depth = desc(ResourceFlags::ALLOW_DEPTH_STENCIL, Format::D24UnormS8Uint);

        assert_eq!(
            default_srv(&depth),
            Some(ViewDesc::Srv(SrvDesc {
                format: Format::R24UnormX8Typeless,
                dimension: SrvDimension::Texture2D {
                    most_detailed_mip: 0,
                    mip_levels: u32::MAX,
                    plane_slice: 0,
                },
            }))
        );
        assert!(default_dsv(&depth).is_some());
        assert_eq!(texture_default_state(depth.flags), ResourceState::DEPTH_WRITE);
    }

    #[test]
    fn packed_size_ignores_pitch_padding() {
        let desc = desc(ResourceFlags::empty(), Format::R8Unorm);
        let footprint = desc.copyable_footprint(0, 0);

        assert_eq!(footprint.row_pitch, 256);
        assert_eq!(packed_size(&footprint), 64 * 32);
    }
}

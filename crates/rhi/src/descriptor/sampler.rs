use std::{
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::Arc,
};

use parking_lot::Mutex;

use super::{DescriptorHeapAllocator, DescriptorSlot};
use crate::{backend::Backend, error::RhiResult, pipeline::ComparisonFunc};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Filter {
    MinMagMipPoint,
    MinMagLinearMipPoint,
    MinMagMipLinear,
    Anisotropic,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

#[derive(Clone, Copy, Debug)]
pub struct SamplerDesc {
    pub filter: Filter,
    /// Turns the sampler into a comparison sampler.
    pub comparison: Option<ComparisonFunc>,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
    pub mip_lod_bias: f32,
    pub max_anisotropy: u32,
    pub border_color: [f32; 4],
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDesc {
    fn float_bits(&self) -> [u32; 7] {
        [
            self.mip_lod_bias.to_bits(),
            self.border_color[0].to_bits(),
            self.border_color[1].to_bits(),
            self.border_color[2].to_bits(),
            self.border_color[3].to_bits(),
            self.min_lod.to_bits(),
            self.max_lod.to_bits(),
        ]
    }
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::MinMagMipLinear,
            comparison: None,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            address_w: AddressMode::Clamp,
            mip_lod_bias: 0.0,
            max_anisotropy: 1,
            border_color: [0.0; 4],
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

// Compared bitwise so that descriptors can key the sampler cache.
impl PartialEq for SamplerDesc {
    fn eq(&self, other: &Self) -> bool {
        self.filter == other.filter
            && self.comparison == other.comparison
            && self.address_u == other.address_u
            && self.address_v == other.address_v
            && self.address_w == other.address_w
            && self.max_anisotropy == other.max_anisotropy
            && self.float_bits() == other.float_bits()
    }
}

impl Eq for SamplerDesc {}

impl Hash for SamplerDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.filter.hash(state);
        self.comparison.hash(state);
        self.address_u.hash(state);
        self.address_v.hash(state);
        self.address_w.hash(state);
        self.max_anisotropy.hash(state);
        self.float_bits().hash(state);
    }
}

pub struct Sampler {
    desc: SamplerDesc,
    slot: DescriptorSlot,
}

impl Sampler {
    #[must_use]
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    #[must_use]
    pub fn slot(&self) -> &DescriptorSlot {
        &self.slot
    }
}

/// Deduplicates samplers by description. Each device owns one.
pub struct SamplerCache {
    heap: Arc<DescriptorHeapAllocator>,
    samplers: Mutex<HashMap<SamplerDesc, Arc<Sampler>>>,
}

impl SamplerCache {
    #[must_use]
    pub fn new(heap: Arc<DescriptorHeapAllocator>) -> Self {
        Self {
            heap,
            samplers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached sampler for `desc`, creating it on a miss.
    pub fn get_or_create(&self, backend: &dyn Backend, desc: &SamplerDesc) -> RhiResult<Arc<Sampler>> {
        let mut samplers = self.samplers.lock();

        if let Some(sampler) = samplers.get(desc) {
            return Ok(sampler.clone());
        }

        let slot = self.heap.allocate()?;
        slot.write_sampler(backend, desc);

        let sampler = Arc::new(Sampler { desc: *desc, slot });
        samplers.insert(*desc, sampler.clone());

        log::trace!("created sampler {desc:?}");
        Ok(sampler)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samplers.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samplers.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backend::null::NullBackend, descriptor::DescriptorHeapKind, node::NodeIndex};

    #[test]
    fn identical_descs_share_a_sampler() {
        let backend = NullBackend::new(1);
        let heap = DescriptorHeapAllocator::new(&backend, NodeIndex::ZERO, DescriptorHeapKind::Sampler, 16)
            .unwrap();
        let cache = SamplerCache::new(heap.clone());

        let linear = SamplerDesc::default();
        let point = SamplerDesc {
            filter: Filter::MinMagMipPoint,
            ..SamplerDesc::default()
        };

        let a = cache.get_or_create(&backend, &linear).unwrap();
        let b = cache.get_or_create(&backend, &linear).unwrap();
        let c = cache.get_or_create(&backend, &point).unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
        assert_eq!(heap.len(), 2);
    }
}

//! Root signatures derived from the resources a set of shaders binds.
//!
//! Shaders are not given hand-written root signatures. Their resource counts
//! are quantized per stage and the quantized state picks (or creates) a
//! shared root signature, so that many shader combinations map onto a few
//! root signatures.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;

use super::{
    encode::{CacheReader, Encoding, HashSink, Sink},
    shader::{
        Shader, ShaderResourceCounts, ShaderStage, MAX_CBS, MAX_SAMPLERS, MAX_SRVS, MAX_UAVS,
    },
};
use crate::{
    backend::{Backend, NativeRootSignature},
    descriptor::ResourceBindingTier,
    error::RhiResult,
    node::GpuNodeMask,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderVisibility {
    All,
    Vertex,
    Hull,
    Domain,
    Geometry,
    Pixel,
}

impl ShaderVisibility {
    fn of(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::Vertex,
            ShaderStage::Hull => Self::Hull,
            ShaderStage::Domain => Self::Domain,
            ShaderStage::Geometry => Self::Geometry,
            ShaderStage::Pixel => Self::Pixel,
            ShaderStage::Compute => Self::All,
        }
    }

    fn from_raw(raw: u32) -> Option<Self> {
        [
            Self::All,
            Self::Vertex,
            Self::Hull,
            Self::Domain,
            Self::Geometry,
            Self::Pixel,
        ]
        .into_iter()
        .find(|v| *v as u32 == raw)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorRangeKind {
    Srv,
    Cbv,
    Sampler,
    Uav,
}

impl DescriptorRangeKind {
    pub const ALL: [DescriptorRangeKind; 4] = [Self::Srv, Self::Cbv, Self::Sampler, Self::Uav];

    fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|v| *v as u32 == raw)
    }

    fn count_in(self, counts: &ShaderResourceCounts) -> u32 {
        match self {
            Self::Srv => counts.srvs,
            Self::Cbv => counts.cbvs,
            Self::Sampler => counts.samplers,
            Self::Uav => counts.uavs,
        }
    }
}

bitflags::bitflags! {
    pub struct RootSignatureFlags: u32 {
        const ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT = 0x1;
        const DENY_VERTEX_SHADER_ROOT_ACCESS = 0x2;
        const DENY_HULL_SHADER_ROOT_ACCESS = 0x4;
        const DENY_DOMAIN_SHADER_ROOT_ACCESS = 0x8;
        const DENY_GEOMETRY_SHADER_ROOT_ACCESS = 0x10;
        const DENY_PIXEL_SHADER_ROOT_ACCESS = 0x20;
        const ALLOW_STREAM_OUTPUT = 0x40;
    }
}

/// A root parameter: a descriptor table holding a single range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RootParameter {
    pub visibility: ShaderVisibility,
    pub kind: DescriptorRangeKind,
    pub count: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RootSignatureDesc {
    pub parameters: Vec<RootParameter>,
    pub flags: RootSignatureFlags,
}

impl Default for RootSignatureFlags {
    fn default() -> Self {
        Self::empty()
    }
}

impl RootSignatureDesc {
    pub fn encode(&self, sink: &mut impl Sink) {
        sink.u32(self.flags.bits());
        sink.u32(self.parameters.len() as u32);
        for parameter in &self.parameters {
            sink.u32(parameter.visibility as u32);
            sink.u32(parameter.kind as u32);
            sink.u32(parameter.count);
        }
    }

    pub fn decode(reader: &mut CacheReader) -> Option<Self> {
        let flags = RootSignatureFlags::from_bits(reader.u32())?;
        let count = reader.u32();

        let mut parameters = Vec::new();
        for _ in 0..count {
            if reader.has_error() {
                return None;
            }
            parameters.push(RootParameter {
                visibility: ShaderVisibility::from_raw(reader.u32())?,
                kind: DescriptorRangeKind::from_raw(reader.u32())?,
                count: reader.u32(),
            });
        }

        (!reader.has_error()).then_some(Self { parameters, flags })
    }
}

/// Resource counts per stage after quantization. Equal quantized states
/// share a root signature.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QuantizedBoundShaderState {
    pub counts: [ShaderResourceCounts; ShaderStage::COUNT],
    pub allow_input_layout: bool,
    pub allow_stream_output: bool,
}

fn quantize(count: u32, max: u32, full_table: bool) -> u32 {
    match count {
        0 => 0,
        _ if full_table => max,
        _ => count.next_power_of_two().min(max),
    }
}

fn quantize_counts(counts: &ShaderResourceCounts, tier: ResourceBindingTier) -> ShaderResourceCounts {
    // Tier 1 requires every table entry to be valid; tier 2 requires it for
    // constant buffer and unordered access tables.
    let tier1 = tier == ResourceBindingTier::Tier1;
    let tier2 = tier <= ResourceBindingTier::Tier2;

    ShaderResourceCounts {
        srvs: quantize(counts.srvs, MAX_SRVS, tier1),
        cbvs: quantize(counts.cbvs, MAX_CBS, tier2),
        samplers: quantize(counts.samplers, MAX_SAMPLERS, tier1),
        uavs: quantize(counts.uavs, MAX_UAVS, tier2),
    }
}

impl QuantizedBoundShaderState {
    #[must_use]
    pub fn for_graphics(
        stages: &[Option<Arc<Shader>>; 5],
        has_input_layout: bool,
        has_stream_output: bool,
        tier: ResourceBindingTier,
    ) -> Self {
        let mut quantized = Self {
            allow_input_layout: has_input_layout,
            allow_stream_output: has_stream_output,
            ..Self::default()
        };

        for (shader, stage) in stages.iter().zip(ShaderStage::GRAPHICS) {
            if let Some(shader) = shader {
                let mut counts = *shader.counts();
                if stage != ShaderStage::Pixel {
                    counts.uavs = 0;
                }
                quantized.counts[stage.index()] = quantize_counts(&counts, tier);
            }
        }

        quantized
    }

    #[must_use]
    pub fn for_compute(shader: &Shader, tier: ResourceBindingTier) -> Self {
        let mut quantized = Self::default();
        quantized.counts[ShaderStage::Compute.index()] = quantize_counts(shader.counts(), tier);
        quantized
    }

    #[must_use]
    pub fn is_compute(&self) -> bool {
        !self.counts[ShaderStage::Compute.index()].is_empty()
    }

    /// The root signature layout: one descriptor table per stage and range
    /// kind in use, ordered by stage, then SRV, CBV, sampler, UAV.
    #[must_use]
    pub fn root_signature_desc(&self) -> (RootSignatureDesc, RootLayout) {
        let mut desc = RootSignatureDesc::default();
        let mut layout = RootLayout::default();

        if self.allow_input_layout {
            desc.flags |= RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT;
        }
        if self.allow_stream_output {
            desc.flags |= RootSignatureFlags::ALLOW_STREAM_OUTPUT;
        }

        let deny = [
            RootSignatureFlags::DENY_VERTEX_SHADER_ROOT_ACCESS,
            RootSignatureFlags::DENY_HULL_SHADER_ROOT_ACCESS,
            RootSignatureFlags::DENY_DOMAIN_SHADER_ROOT_ACCESS,
            RootSignatureFlags::DENY_GEOMETRY_SHADER_ROOT_ACCESS,
            RootSignatureFlags::DENY_PIXEL_SHADER_ROOT_ACCESS,
        ];

        let stages = [
            ShaderStage::Vertex,
            ShaderStage::Hull,
            ShaderStage::Domain,
            ShaderStage::Geometry,
            ShaderStage::Pixel,
            ShaderStage::Compute,
        ];

        for stage in stages {
            let counts = &self.counts[stage.index()];

            if counts.is_empty() {
                if let Some(flag) = deny.get(stage.index()) {
                    if !self.is_compute() {
                        desc.flags |= *flag;
                    }
                }
                continue;
            }

            for kind in DescriptorRangeKind::ALL {
                let count = kind.count_in(counts);
                if count > 0 {
                    layout.tables[stage.index()][kind as usize] = Some(desc.parameters.len() as u8);
                    desc.parameters.push(RootParameter {
                        visibility: ShaderVisibility::of(stage),
                        kind,
                        count,
                    });
                }
            }
        }

        (desc, layout)
    }

    pub fn encode(&self, sink: &mut impl Sink) {
        for counts in &self.counts {
            sink.u32(counts.srvs);
            sink.u32(counts.cbvs);
            sink.u32(counts.samplers);
            sink.u32(counts.uavs);
        }
        sink.bool(self.allow_input_layout);
        sink.bool(self.allow_stream_output);
    }

    pub fn decode(reader: &mut CacheReader) -> Self {
        let mut quantized = Self::default();
        for counts in &mut quantized.counts {
            counts.srvs = reader.u32();
            counts.cbvs = reader.u32();
            counts.samplers = reader.u32();
            counts.uavs = reader.u32();
        }
        quantized.allow_input_layout = reader.bool();
        quantized.allow_stream_output = reader.bool();
        quantized
    }
}

/// Maps (stage, range kind) to the root parameter holding that table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RootLayout {
    tables: [[Option<u8>; 4]; ShaderStage::COUNT],
}

impl RootLayout {
    #[must_use]
    pub fn table(&self, stage: ShaderStage, kind: DescriptorRangeKind) -> Option<u32> {
        self.tables[stage.index()][kind as usize].map(u32::from)
    }
}

pub struct RootSignature {
    native: Arc<dyn NativeRootSignature>,
    blob: Arc<[u8]>,
    blob_hash: u64,
    quantized: QuantizedBoundShaderState,
    layout: RootLayout,
    desc: RootSignatureDesc,
}

impl RootSignature {
    #[must_use]
    pub fn native(&self) -> &Arc<dyn NativeRootSignature> {
        &self.native
    }

    /// The serialized form the native object was created from.
    #[must_use]
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    #[must_use]
    pub fn blob_hash(&self) -> u64 {
        self.blob_hash
    }

    #[must_use]
    pub fn quantized(&self) -> &QuantizedBoundShaderState {
        &self.quantized
    }

    #[must_use]
    pub fn layout(&self) -> &RootLayout {
        &self.layout
    }

    #[must_use]
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    /// The number of descriptors in the table at root parameter `index`.
    #[must_use]
    pub fn table_size(&self, index: u32) -> u32 {
        self.desc
            .parameters
            .get(index as usize)
            .map_or(0, |p| p.count)
    }

    /// Whether two root signatures are interchangeable.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || (self.blob_hash == other.blob_hash && self.blob == other.blob)
    }

    pub(crate) fn encode(&self, sink: &mut impl Sink, encoding: Encoding) {
        match encoding {
            Encoding::Hash => sink.u64(self.blob_hash),
            Encoding::Disk => {
                self.quantized.encode(sink);
                sink.blob(&self.blob);
            }
        }
    }
}

impl fmt::Debug for RootSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootSignature")
            .field("blob_hash", &format_args!("{:016x}", self.blob_hash))
            .field("parameters", &self.desc.parameters.len())
            .finish()
    }
}

fn hash_blob(blob: &[u8]) -> u64 {
    let mut sink = HashSink::new();
    sink.bytes(blob);
    sink.finish()
}

#[derive(Default)]
struct Signatures {
    by_state: HashMap<QuantizedBoundShaderState, Arc<RootSignature>>,
    by_blob: HashMap<u64, Vec<Arc<RootSignature>>>,
}

impl Signatures {
    fn find_blob(&self, hash: u64, blob: &[u8]) -> Option<&Arc<RootSignature>> {
        self.by_blob
            .get(&hash)
            .and_then(|bucket| bucket.iter().find(|rs| &*rs.blob == blob))
    }
}

/// Maps quantized shader states to shared root signatures.
pub struct RootSignatureManager {
    backend: Arc<dyn Backend>,
    nodes: GpuNodeMask,
    tier: ResourceBindingTier,
    signatures: Mutex<Signatures>,
}

impl RootSignatureManager {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, nodes: GpuNodeMask, tier: ResourceBindingTier) -> Self {
        Self {
            backend,
            nodes,
            tier,
            signatures: Mutex::new(Signatures::default()),
        }
    }

    #[must_use]
    pub fn tier(&self) -> ResourceBindingTier {
        self.tier
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.signatures.lock().by_state.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the root signature for `quantized`, creating it on a miss.
    pub fn get_or_create(&self, quantized: &QuantizedBoundShaderState) -> RhiResult<Arc<RootSignature>> {
        let mut signatures = self.signatures.lock();

        if let Some(rs) = signatures.by_state.get(quantized) {
            return Ok(rs.clone());
        }

        let (desc, layout) = quantized.root_signature_desc();
        let blob = self.backend.serialize_root_signature(&desc)?;
        let blob_hash = hash_blob(&blob);

        let rs = match signatures.find_blob(blob_hash, &blob) {
            Some(rs) => rs.clone(),
            None => {
                let native = self.backend.create_root_signature(self.nodes, &blob)?;
                let rs = Arc::new(RootSignature {
                    native,
                    blob: blob.into(),
                    blob_hash,
                    quantized: *quantized,
                    layout,
                    desc,
                });
                signatures.by_blob.entry(blob_hash).or_default().push(rs.clone());
                log::debug!("created root signature {blob_hash:016x}");
                rs
            }
        };

        signatures.by_state.insert(*quantized, rs.clone());
        Ok(rs)
    }

    /// Recreates a root signature from its persisted form, sharing an
    /// existing object when the blob is already known.
    pub fn get_or_create_from_blob(
        &self,
        quantized: &QuantizedBoundShaderState,
        blob: &[u8],
    ) -> RhiResult<Arc<RootSignature>> {
        let mut signatures = self.signatures.lock();
        let blob_hash = hash_blob(blob);

        if let Some(rs) = signatures.find_blob(blob_hash, blob) {
            return Ok(rs.clone());
        }

        let (desc, layout) = quantized.root_signature_desc();
        let native = self.backend.create_root_signature(self.nodes, blob)?;
        let rs = Arc::new(RootSignature {
            native,
            blob: blob.into(),
            blob_hash,
            quantized: *quantized,
            layout,
            desc,
        });

        signatures.by_blob.entry(blob_hash).or_default().push(rs.clone());
        signatures
            .by_state
            .entry(*quantized)
            .or_insert_with(|| rs.clone());

        Ok(rs)
    }

    /// Reads a root signature written with `Encoding::Disk`.
    pub(crate) fn decode(&self, reader: &mut CacheReader) -> Option<Arc<RootSignature>> {
        let quantized = QuantizedBoundShaderState::decode(reader);
        let blob = reader.blob();
        if reader.has_error() {
            return None;
        }

        match self.get_or_create_from_blob(&quantized, blob) {
            Ok(rs) => Some(rs),
            Err(e) => {
                log::warn!("could not recreate cached root signature: {e}");
                reader.set_error();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::null::NullBackend;

    fn counts(srvs: u32, cbvs: u32, samplers: u32, uavs: u32) -> ShaderResourceCounts {
        ShaderResourceCounts {
            srvs,
            cbvs,
            samplers,
            uavs,
        }
    }

    #[test]
    fn quantization_per_tier() {
        let c = counts(3, 1, 0, 2);

        assert_eq!(
            quantize_counts(&c, ResourceBindingTier::Tier3),
            counts(4, 1, 0, 2)
        );
        assert_eq!(
            quantize_counts(&c, ResourceBindingTier::Tier2),
            counts(4, MAX_CBS, 0, MAX_UAVS)
        );
        assert_eq!(
            quantize_counts(&c, ResourceBindingTier::Tier1),
            counts(MAX_SRVS, MAX_CBS, 0, MAX_UAVS)
        );
        assert_eq!(
            quantize_counts(&counts(200, 0, 0, 0), ResourceBindingTier::Tier3).srvs,
            MAX_SRVS
        );
    }

    #[test]
    fn layout_assigns_tables_in_order() {
        let vs = Shader::new(ShaderStage::Vertex, vec![0u8; 4], counts(0, 1, 0, 0));
        let ps = Shader::new(ShaderStage::Pixel, vec![1u8; 4], counts(2, 1, 1, 0));
        let stages = [Some(vs), None, None, None, Some(ps)];

        let quantized =
            QuantizedBoundShaderState::for_graphics(&stages, true, false, ResourceBindingTier::Tier3);
        let (desc, layout) = quantized.root_signature_desc();

        assert_eq!(desc.parameters.len(), 4);
        assert_eq!(layout.table(ShaderStage::Vertex, DescriptorRangeKind::Cbv), Some(0));
        assert_eq!(layout.table(ShaderStage::Pixel, DescriptorRangeKind::Srv), Some(1));
        assert_eq!(layout.table(ShaderStage::Pixel, DescriptorRangeKind::Sampler), Some(3));
        assert_eq!(layout.table(ShaderStage::Pixel, DescriptorRangeKind::Uav), None);
        assert!(desc
            .flags
            .contains(RootSignatureFlags::ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT));
        assert!(desc.flags.contains(RootSignatureFlags::DENY_HULL_SHADER_ROOT_ACCESS));
        assert!(!desc.flags.contains(RootSignatureFlags::DENY_PIXEL_SHADER_ROOT_ACCESS));
    }

    #[test]
    fn equal_states_share_a_root_signature() {
        let backend: Arc<dyn Backend> = Arc::new(NullBackend::new(1));
        let manager = RootSignatureManager::new(
            backend,
            GpuNodeMask::first_n(1),
            ResourceBindingTier::Tier3,
        );

        let a = Shader::new(ShaderStage::Compute, vec![0u8; 4], counts(3, 1, 0, 0));
        let b = Shader::new(ShaderStage::Compute, vec![1u8; 4], counts(4, 1, 0, 0));

        let qa = QuantizedBoundShaderState::for_compute(&a, ResourceBindingTier::Tier3);
        let qb = QuantizedBoundShaderState::for_compute(&b, ResourceBindingTier::Tier3);
        assert_eq!(qa, qb);

        let ra = manager.get_or_create(&qa).unwrap();
        let rb = manager.get_or_create(&qb).unwrap();
        assert!(Arc::ptr_eq(&ra, &rb));
        assert_eq!(manager.len(), 1);

        let reloaded = manager.get_or_create_from_blob(&qa, ra.blob()).unwrap();
        assert!(Arc::ptr_eq(&ra, &reloaded));
    }
}

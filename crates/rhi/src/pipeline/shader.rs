use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use super::{
    desc::{InputElement, StreamOutput},
    root_signature::RootSignature,
};

pub const MAX_SRVS: u32 = 64;
pub const MAX_CBS: u32 = 16;
pub const MAX_SAMPLERS: u32 = 16;
pub const MAX_UAVS: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex = 0,
    Hull = 1,
    Domain = 2,
    Geometry = 3,
    Pixel = 4,
    Compute = 5,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    pub const GRAPHICS: [ShaderStage; 5] = [
        Self::Vertex,
        Self::Hull,
        Self::Domain,
        Self::Geometry,
        Self::Pixel,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

/// How many resources of each kind a shader binds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ShaderResourceCounts {
    pub srvs: u32,
    pub cbvs: u32,
    pub samplers: u32,
    pub uavs: u32,
}

impl ShaderResourceCounts {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Compiled shader code together with its CRC.
#[derive(Clone)]
pub struct ShaderBytecode {
    bytes: Arc<[u8]>,
    hash: u32,
}

impl ShaderBytecode {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        let bytes = bytes.into();
        let hash = crc32fast::hash(&bytes);
        Self { bytes, hash }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl PartialEq for ShaderBytecode {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && (Arc::ptr_eq(&self.bytes, &other.bytes) || self.bytes == other.bytes)
    }
}

impl Eq for ShaderBytecode {}

impl fmt::Debug for ShaderBytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ShaderBytecode({} bytes, {:08x})", self.bytes.len(), self.hash)
    }
}

#[derive(Debug)]
pub struct Shader {
    stage: ShaderStage,
    bytecode: ShaderBytecode,
    counts: ShaderResourceCounts,
}

impl Shader {
    pub fn new(
        stage: ShaderStage,
        bytecode: impl Into<Arc<[u8]>>,
        counts: ShaderResourceCounts,
    ) -> Arc<Self> {
        Arc::new(Self {
            stage,
            bytecode: ShaderBytecode::new(bytecode),
            counts,
        })
    }

    #[must_use]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[must_use]
    pub fn bytecode(&self) -> &ShaderBytecode {
        &self.bytecode
    }

    #[must_use]
    pub fn counts(&self) -> &ShaderResourceCounts {
        &self.counts
    }
}

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

/// Ids are drawn from a single process-wide counter and are never reused,
/// so an id uniquely identifies one shader state object for the lifetime of
/// the process even when its allocation is recycled.
pub(crate) fn next_unique_id() -> u64 {
    NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed)
}

/// The set of shaders, vertex layout and root signature a graphics pipeline
/// is built from.
pub struct BoundShaderState {
    unique_id: u64,
    stages: [Option<Arc<Shader>>; 5],
    input_layout: Vec<InputElement>,
    stream_output: Option<StreamOutput>,
    root_signature: Arc<RootSignature>,
}

impl BoundShaderState {
    pub(crate) fn new(
        stages: [Option<Arc<Shader>>; 5],
        input_layout: Vec<InputElement>,
        stream_output: Option<StreamOutput>,
        root_signature: Arc<RootSignature>,
    ) -> Self {
        debug_assert!(stages[0].is_some(), "bound shader state without a vertex shader");
        debug_assert!(stages
            .iter()
            .zip(ShaderStage::GRAPHICS)
            .all(|(s, stage)| s.as_ref().map_or(true, |s| s.stage() == stage)));

        Self {
            unique_id: next_unique_id(),
            stages,
            input_layout,
            stream_output,
            root_signature,
        }
    }

    #[must_use]
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    #[must_use]
    pub fn shader(&self, stage: ShaderStage) -> Option<&Arc<Shader>> {
        self.stages.get(stage.index()).and_then(Option::as_ref)
    }

    #[must_use]
    pub fn input_layout(&self) -> &[InputElement] {
        &self.input_layout
    }

    #[must_use]
    pub fn stream_output(&self) -> Option<&StreamOutput> {
        self.stream_output.as_ref()
    }

    #[must_use]
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }
}

impl fmt::Debug for BoundShaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundShaderState")
            .field("unique_id", &self.unique_id)
            .field("input_elements", &self.input_layout.len())
            .finish_non_exhaustive()
    }
}

pub struct ComputeShader {
    unique_id: u64,
    shader: Arc<Shader>,
    root_signature: Arc<RootSignature>,
}

impl ComputeShader {
    pub(crate) fn new(shader: Arc<Shader>, root_signature: Arc<RootSignature>) -> Self {
        debug_assert_eq!(shader.stage(), ShaderStage::Compute);
        Self {
            unique_id: next_unique_id(),
            shader,
            root_signature,
        }
    }

    #[must_use]
    pub fn unique_id(&self) -> u64 {
        self.unique_id
    }

    #[must_use]
    pub fn shader(&self) -> &Arc<Shader> {
        &self.shader
    }

    #[must_use]
    pub fn root_signature(&self) -> &Arc<RootSignature> {
        &self.root_signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_are_never_reused() {
        let ids: Vec<u64> = (0..100).map(|_| next_unique_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn bytecode_equality() {
        let a = ShaderBytecode::new(vec![1u8, 2, 3]);
        let b = ShaderBytecode::new(vec![1u8, 2, 3]);
        let c = ShaderBytecode::new(vec![1u8, 2, 4]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.hash(), crc32fast::hash(&[1, 2, 3]));
    }
}

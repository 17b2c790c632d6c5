//! Pipeline states, root signatures and their caches.

mod cache;
mod compiler;
pub mod desc;
pub mod disk;
pub mod encode;
mod root_signature;
mod shader;
mod state;

pub use cache::{PipelineCacheStats, PipelineStateCache};
pub use compiler::{CompileTask, PipelineCompiler};
pub use desc::{
    Blend, BlendOp, BlendState, ColorWriteMask, ComparisonFunc, ComputePipelineDesc, CullMode,
    DepthStencilState, FillMode, FixedFunctionState, GraphicsPipelineDesc,
    GraphicsPipelineInitializer, InputElement, PrimitiveTopology, PrimitiveTopologyType,
    RasterizerState, RenderTargetBlend, RenderTargetFormats, StencilFace, StencilOp, StreamOutput,
    StreamOutputDecl,
};
pub use root_signature::{
    DescriptorRangeKind, QuantizedBoundShaderState, RootLayout, RootParameter, RootSignature,
    RootSignatureDesc, RootSignatureFlags, RootSignatureManager, ShaderVisibility,
};
pub use shader::{
    BoundShaderState, ComputeShader, Shader, ShaderBytecode, ShaderResourceCounts, ShaderStage,
    MAX_CBS, MAX_SAMPLERS, MAX_SRVS, MAX_UAVS,
};
pub use state::{PipelineKind, PipelineState};

//! Pipeline state descriptions.
//!
//! A [`GraphicsPipelineInitializer`] is what callers ask for: a bound shader
//! state plus fixed-function state. A [`GraphicsPipelineDesc`] is what the
//! driver compiles, flattened to bytecode and a root signature, and is the
//! unit of hashing and persistence.

use std::{fmt, sync::Arc};

use super::{
    encode::{CacheReader, Encoding, HashSink, Sink},
    root_signature::RootSignature,
    shader::{BoundShaderState, ComputeShader, ShaderBytecode, ShaderStage},
};
use crate::{format::Format, node::GpuNodeMask};

macro_rules! raw_conversions {
    ($name:ident { $($variant:ident),+ $(,)? }) => {
        impl $name {
            #[must_use]
            pub fn raw(self) -> u32 {
                self as u32
            }

            #[must_use]
            pub fn from_raw(raw: u32) -> Option<Self> {
                [$(Self::$variant),+].into_iter().find(|v| *v as u32 == raw)
            }
        }
    };
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Blend {
    #[default]
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    BlendFactor,
    InvBlendFactor,
}

raw_conversions!(Blend {
    Zero, One, SrcColor, InvSrcColor, SrcAlpha, InvSrcAlpha, DestAlpha, InvDestAlpha,
    DestColor, InvDestColor, BlendFactor, InvBlendFactor,
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

raw_conversions!(BlendOp { Add, Subtract, RevSubtract, Min, Max });

bitflags::bitflags! {
    pub struct ColorWriteMask: u8 {
        const RED = 0x1;
        const GREEN = 0x2;
        const BLUE = 0x4;
        const ALPHA = 0x8;
        const ALL = 0xF;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

raw_conversions!(FillMode { Solid, Wireframe });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

raw_conversions!(CullMode { None, Front, Back });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

raw_conversions!(ComparisonFunc {
    Never, Less, Equal, LessEqual, Greater, NotEqual, GreaterEqual, Always,
});

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

raw_conversions!(StencilOp { Keep, Zero, Replace, IncrSat, DecrSat, Invert, Incr, Decr });

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopologyType {
    Undefined,
    Point,
    Line,
    #[default]
    Triangle,
    Patch,
}

raw_conversions!(PrimitiveTopologyType { Undefined, Point, Line, Triangle, Patch });

/// The primitive topology set on the input assembler at draw time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    PatchList { control_points: u8 },
}

impl PrimitiveTopology {
    #[must_use]
    pub fn topology_type(self) -> PrimitiveTopologyType {
        match self {
            Self::PointList => PrimitiveTopologyType::Point,
            Self::LineList | Self::LineStrip => PrimitiveTopologyType::Line,
            Self::TriangleList | Self::TriangleStrip => PrimitiveTopologyType::Triangle,
            Self::PatchList { .. } => PrimitiveTopologyType::Patch,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderTargetBlend {
    pub blend_enable: bool,
    pub src_color: Blend,
    pub dst_color: Blend,
    pub color_op: BlendOp,
    pub src_alpha: Blend,
    pub dst_alpha: Blend,
    pub alpha_op: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for RenderTargetBlend {
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color: Blend::One,
            dst_color: Blend::Zero,
            color_op: BlendOp::Add,
            src_alpha: Blend::One,
            dst_alpha: Blend::Zero,
            alpha_op: BlendOp::Add,
            write_mask: ColorWriteMask::ALL,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlendState {
    pub alpha_to_coverage: bool,
    pub independent_blend: bool,
    pub render_targets: [RenderTargetBlend; 8],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RasterizerState {
    pub fill_mode: FillMode,
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub depth_bias_clamp: f32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip: bool,
    pub multisample: bool,
    pub conservative: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            fill_mode: FillMode::Solid,
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
            multisample: false,
            conservative: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StencilFace {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunc,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthStencilState {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFace,
    pub back: StencilFace,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTargetFormats {
    pub count: u32,
    pub formats: [Format; 8],
    pub depth_stencil: Format,
    pub sample_count: u32,
    pub sample_quality: u32,
}

impl Default for RenderTargetFormats {
    fn default() -> Self {
        Self {
            count: 0,
            formats: [Format::Unknown; 8],
            depth_stencil: Format::Unknown,
            sample_count: 1,
            sample_quality: 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputElement {
    pub semantic_name: String,
    pub semantic_index: u32,
    pub format: Format,
    pub input_slot: u32,
    pub aligned_byte_offset: u32,
    pub per_instance: bool,
    pub instance_step_rate: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOutputDecl {
    pub stream: u32,
    /// `None` declares a gap in the output.
    pub semantic_name: Option<String>,
    pub semantic_index: u32,
    pub start_component: u8,
    pub component_count: u8,
    pub output_slot: u8,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamOutput {
    pub decls: Vec<StreamOutputDecl>,
    pub strides: Vec<u32>,
    pub rasterized_stream: u32,
}

/// Everything in a graphics pipeline that is not a shader.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedFunctionState {
    pub blend: BlendState,
    pub rasterizer: RasterizerState,
    pub depth_stencil: DepthStencilState,
    pub primitive_type: PrimitiveTopologyType,
    pub sample_mask: u32,
    pub targets: RenderTargetFormats,
}

impl Default for FixedFunctionState {
    fn default() -> Self {
        Self {
            blend: BlendState::default(),
            rasterizer: RasterizerState::default(),
            depth_stencil: DepthStencilState::default(),
            primitive_type: PrimitiveTopologyType::Triangle,
            sample_mask: u32::MAX,
            targets: RenderTargetFormats::default(),
        }
    }
}

impl FixedFunctionState {
    /// A hash of the fixed-function state alone.
    #[must_use]
    pub fn hash(&self) -> u64 {
        let mut sink = HashSink::new();
        self.encode(&mut sink);
        sink.finish()
    }

    pub fn encode(&self, sink: &mut impl Sink) {
        let blend = &self.blend;
        sink.bool(blend.alpha_to_coverage);
        sink.bool(blend.independent_blend);
        for rt in &blend.render_targets {
            sink.bool(rt.blend_enable);
            sink.u32(rt.src_color.raw());
            sink.u32(rt.dst_color.raw());
            sink.u32(rt.color_op.raw());
            sink.u32(rt.src_alpha.raw());
            sink.u32(rt.dst_alpha.raw());
            sink.u32(rt.alpha_op.raw());
            sink.u8(rt.write_mask.bits());
        }

        let raster = &self.rasterizer;
        sink.u32(raster.fill_mode.raw());
        sink.u32(raster.cull_mode.raw());
        sink.bool(raster.front_counter_clockwise);
        sink.i32(raster.depth_bias);
        sink.f32(raster.depth_bias_clamp);
        sink.f32(raster.slope_scaled_depth_bias);
        sink.bool(raster.depth_clip);
        sink.bool(raster.multisample);
        sink.bool(raster.conservative);

        let ds = &self.depth_stencil;
        sink.bool(ds.depth_enable);
        sink.bool(ds.depth_write);
        sink.u32(ds.depth_func.raw());
        sink.bool(ds.stencil_enable);
        sink.u8(ds.stencil_read_mask);
        sink.u8(ds.stencil_write_mask);
        for face in [&ds.front, &ds.back] {
            sink.u32(face.fail_op.raw());
            sink.u32(face.depth_fail_op.raw());
            sink.u32(face.pass_op.raw());
            sink.u32(face.func.raw());
        }

        sink.u32(self.primitive_type.raw());
        sink.u32(self.sample_mask);

        let targets = &self.targets;
        sink.u32(targets.count);
        for format in &targets.formats {
            sink.u32(format.raw());
        }
        sink.u32(targets.depth_stencil.raw());
        sink.u32(targets.sample_count);
        sink.u32(targets.sample_quality);
    }

    pub fn decode(reader: &mut CacheReader) -> Self {
        let mut state = Self::default();

        let blend = &mut state.blend;
        blend.alpha_to_coverage = reader.bool();
        blend.independent_blend = reader.bool();
        for rt in &mut blend.render_targets {
            rt.blend_enable = reader.bool();
            rt.src_color = reader.enumeration(Blend::from_raw);
            rt.dst_color = reader.enumeration(Blend::from_raw);
            rt.color_op = reader.enumeration(BlendOp::from_raw);
            rt.src_alpha = reader.enumeration(Blend::from_raw);
            rt.dst_alpha = reader.enumeration(Blend::from_raw);
            rt.alpha_op = reader.enumeration(BlendOp::from_raw);
            rt.write_mask = ColorWriteMask::from_bits_truncate(reader.u8());
        }

        let raster = &mut state.rasterizer;
        raster.fill_mode = reader.enumeration(FillMode::from_raw);
        raster.cull_mode = reader.enumeration(CullMode::from_raw);
        raster.front_counter_clockwise = reader.bool();
        raster.depth_bias = reader.i32();
        raster.depth_bias_clamp = reader.f32();
        raster.slope_scaled_depth_bias = reader.f32();
        raster.depth_clip = reader.bool();
        raster.multisample = reader.bool();
        raster.conservative = reader.bool();

        let ds = &mut state.depth_stencil;
        ds.depth_enable = reader.bool();
        ds.depth_write = reader.bool();
        ds.depth_func = reader.enumeration(ComparisonFunc::from_raw);
        ds.stencil_enable = reader.bool();
        ds.stencil_read_mask = reader.u8();
        ds.stencil_write_mask = reader.u8();
        for face in [&mut ds.front, &mut ds.back] {
            face.fail_op = reader.enumeration(StencilOp::from_raw);
            face.depth_fail_op = reader.enumeration(StencilOp::from_raw);
            face.pass_op = reader.enumeration(StencilOp::from_raw);
            face.func = reader.enumeration(ComparisonFunc::from_raw);
        }

        state.primitive_type = reader.enumeration(PrimitiveTopologyType::from_raw);
        state.sample_mask = reader.u32();

        let targets = &mut state.targets;
        targets.count = reader.u32();
        for format in &mut targets.formats {
            *format = reader.enumeration(Format::from_raw);
        }
        targets.depth_stencil = reader.enumeration(Format::from_raw);
        targets.sample_count = reader.u32();
        targets.sample_quality = reader.u32();

        state
    }
}

fn encode_input_layout(layout: &[InputElement], sink: &mut impl Sink) {
    sink.u32(layout.len() as u32);
    for element in layout {
        sink.str(&element.semantic_name);
        sink.u32(element.semantic_index);
        sink.u32(element.format.raw());
        sink.u32(element.input_slot);
        sink.u32(element.aligned_byte_offset);
        sink.bool(element.per_instance);
        sink.u32(element.instance_step_rate);
    }
}

fn decode_input_layout(reader: &mut CacheReader) -> Vec<InputElement> {
    let count = reader.u32() as usize;
    let mut layout = Vec::with_capacity(count.min(reader.remaining()));
    for _ in 0..count {
        if reader.has_error() {
            break;
        }
        layout.push(InputElement {
            semantic_name: reader.string(),
            semantic_index: reader.u32(),
            format: reader.enumeration(Format::from_raw),
            input_slot: reader.u32(),
            aligned_byte_offset: reader.u32(),
            per_instance: reader.bool(),
            instance_step_rate: reader.u32(),
        });
    }
    layout
}

fn encode_stream_output(so: Option<&StreamOutput>, sink: &mut impl Sink) {
    let Some(so) = so else {
        sink.bool(false);
        return;
    };

    sink.bool(true);
    sink.u32(so.decls.len() as u32);
    for decl in &so.decls {
        sink.u32(decl.stream);
        match &decl.semantic_name {
            Some(name) => {
                sink.bool(true);
                sink.str(name);
            }
            None => sink.bool(false),
        }
        sink.u32(decl.semantic_index);
        sink.u8(decl.start_component);
        sink.u8(decl.component_count);
        sink.u8(decl.output_slot);
    }
    sink.u32(so.strides.len() as u32);
    for stride in &so.strides {
        sink.u32(*stride);
    }
    sink.u32(so.rasterized_stream);
}

fn decode_stream_output(reader: &mut CacheReader) -> Option<StreamOutput> {
    if !reader.bool() {
        return None;
    }

    let mut so = StreamOutput::default();
    let count = reader.u32();
    for _ in 0..count {
        if reader.has_error() {
            break;
        }
        let stream = reader.u32();
        let semantic_name = reader.bool().then(|| reader.string());
        so.decls.push(StreamOutputDecl {
            stream,
            semantic_name,
            semantic_index: reader.u32(),
            start_component: reader.u8(),
            component_count: reader.u8(),
            output_slot: reader.u8(),
        });
    }
    let count = reader.u32();
    for _ in 0..count {
        if reader.has_error() {
            break;
        }
        so.strides.push(reader.u32());
    }
    so.rasterized_stream = reader.u32();
    Some(so)
}

fn encode_bytecode(bytecode: &ShaderBytecode, sink: &mut impl Sink, encoding: Encoding) {
    match encoding {
        Encoding::Hash => {
            sink.u32(bytecode.len() as u32);
            sink.u32(bytecode.hash());
        }
        Encoding::Disk => sink.blob(bytecode.bytes()),
    }
}

/// A caller's request for a graphics pipeline.
#[derive(Clone)]
pub struct GraphicsPipelineInitializer {
    pub bound_shader_state: Arc<BoundShaderState>,
    pub state: FixedFunctionState,
}

/// The flattened, driver-facing description of a graphics pipeline.
#[derive(Clone)]
pub struct GraphicsPipelineDesc {
    pub root_signature: Arc<RootSignature>,
    /// Vertex, hull, domain, geometry and pixel bytecode, in stage order.
    pub shaders: [Option<ShaderBytecode>; 5],
    pub input_layout: Vec<InputElement>,
    pub stream_output: Option<StreamOutput>,
    pub state: FixedFunctionState,
    pub node_mask: GpuNodeMask,
}

impl GraphicsPipelineDesc {
    #[must_use]
    pub fn from_initializer(initializer: &GraphicsPipelineInitializer, node_mask: GpuNodeMask) -> Self {
        let bss = &initializer.bound_shader_state;
        let shaders = ShaderStage::GRAPHICS.map(|stage| bss.shader(stage).map(|s| s.bytecode().clone()));

        Self {
            root_signature: bss.root_signature().clone(),
            shaders,
            input_layout: bss.input_layout().to_vec(),
            stream_output: bss.stream_output().cloned(),
            state: initializer.state,
            node_mask,
        }
    }

    /// The combined 64-bit hash used to key the low-level cache.
    ///
    /// Computed over the canonical content of the description, never over
    /// addresses, so it is stable across runs.
    #[must_use]
    pub fn combined_hash(&self) -> u64 {
        let mut sink = HashSink::new();
        self.encode(&mut sink, Encoding::Hash);
        sink.finish()
    }

    #[must_use]
    pub fn shader(&self, stage: ShaderStage) -> Option<&ShaderBytecode> {
        self.shaders.get(stage.index()).and_then(Option::as_ref)
    }

    pub fn encode(&self, sink: &mut impl Sink, encoding: Encoding) {
        self.root_signature.encode(sink, encoding);
        for shader in &self.shaders {
            match shader {
                Some(bytecode) => {
                    sink.bool(true);
                    encode_bytecode(bytecode, sink, encoding);
                }
                None => sink.bool(false),
            }
        }
        encode_input_layout(&self.input_layout, sink);
        encode_stream_output(self.stream_output.as_ref(), sink);
        self.state.encode(sink);
        sink.u32(self.node_mask.bits());
    }

    /// Reads a description written with `Encoding::Disk`. The root signature
    /// is resolved through `root_signature` from its stored form.
    pub fn decode(
        reader: &mut CacheReader,
        root_signature: impl FnOnce(&mut CacheReader) -> Option<Arc<RootSignature>>,
    ) -> Option<Self> {
        let root_signature = root_signature(reader)?;

        let mut shaders: [Option<ShaderBytecode>; 5] = Default::default();
        for shader in &mut shaders {
            if reader.bool() {
                *shader = Some(ShaderBytecode::new(reader.blob().to_vec()));
            }
        }

        let input_layout = decode_input_layout(reader);
        let stream_output = decode_stream_output(reader);
        let state = FixedFunctionState::decode(reader);
        let node_mask = GpuNodeMask::from_bits(reader.u32());

        (!reader.has_error()).then(|| Self {
            root_signature,
            shaders,
            input_layout,
            stream_output,
            state,
            node_mask,
        })
    }
}

impl PartialEq for GraphicsPipelineDesc {
    fn eq(&self, other: &Self) -> bool {
        self.root_signature.same_as(&other.root_signature)
            && self.shaders == other.shaders
            && self.input_layout == other.input_layout
            && self.stream_output == other.stream_output
            && self.state == other.state
            && self.node_mask == other.node_mask
    }
}

impl fmt::Debug for GraphicsPipelineDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipelineDesc")
            .field("shaders", &self.shaders)
            .field("input_layout", &self.input_layout.len())
            .field("primitive_type", &self.state.primitive_type)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ComputePipelineDesc {
    pub root_signature: Arc<RootSignature>,
    pub shader: ShaderBytecode,
    pub node_mask: GpuNodeMask,
}

impl ComputePipelineDesc {
    #[must_use]
    pub fn from_shader(shader: &ComputeShader, node_mask: GpuNodeMask) -> Self {
        Self {
            root_signature: shader.root_signature().clone(),
            shader: shader.shader().bytecode().clone(),
            node_mask,
        }
    }

    #[must_use]
    pub fn combined_hash(&self) -> u64 {
        let mut sink = HashSink::new();
        self.encode(&mut sink, Encoding::Hash);
        sink.finish()
    }

    pub fn encode(&self, sink: &mut impl Sink, encoding: Encoding) {
        self.root_signature.encode(sink, encoding);
        encode_bytecode(&self.shader, sink, encoding);
        sink.u32(self.node_mask.bits());
    }

    pub fn decode(
        reader: &mut CacheReader,
        root_signature: impl FnOnce(&mut CacheReader) -> Option<Arc<RootSignature>>,
    ) -> Option<Self> {
        let root_signature = root_signature(reader)?;
        let shader = ShaderBytecode::new(reader.blob().to_vec());
        let node_mask = GpuNodeMask::from_bits(reader.u32());

        (!reader.has_error()).then(|| Self {
            root_signature,
            shader,
            node_mask,
        })
    }
}

impl PartialEq for ComputePipelineDesc {
    fn eq(&self, other: &Self) -> bool {
        self.root_signature.same_as(&other.root_signature)
            && self.shader == other.shader
            && self.node_mask == other.node_mask
    }
}

impl fmt::Debug for ComputePipelineDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputePipelineDesc")
            .field("shader", &self.shader)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_function_state_survives_encoding() {
        let mut state = FixedFunctionState::default();
        state.rasterizer.cull_mode = CullMode::None;
        state.rasterizer.depth_bias_clamp = 0.25;
        state.blend.render_targets[1].blend_enable = true;
        state.blend.render_targets[1].src_color = Blend::SrcAlpha;
        state.targets.count = 2;
        state.targets.formats[0] = Format::R16G16B16A16Float;
        state.targets.depth_stencil = Format::D32Float;

        let mut bytes = Vec::new();
        state.encode(&mut bytes);

        let mut reader = CacheReader::new(&bytes);
        assert_eq!(FixedFunctionState::decode(&mut reader), state);
        assert!(!reader.has_error());
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn fixed_function_hash_tracks_content() {
        let a = FixedFunctionState::default();
        let mut b = a;
        assert_eq!(a.hash(), b.hash());

        b.depth_stencil.depth_write = false;
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn invalid_enum_flags_the_reader() {
        let mut bytes = Vec::new();
        FixedFunctionState::default().encode(&mut bytes);
        // The first render target's source colour blend.
        bytes[3..7].copy_from_slice(&1000u32.to_le_bytes());

        let mut reader = CacheReader::new(&bytes);
        let _ = FixedFunctionState::decode(&mut reader);
        assert!(reader.has_error());
    }

    #[test]
    fn stream_output_layout_round_trips() {
        let so = StreamOutput {
            decls: vec![
                StreamOutputDecl {
                    stream: 0,
                    semantic_name: Some("POSITION".into()),
                    semantic_index: 0,
                    start_component: 0,
                    component_count: 4,
                    output_slot: 0,
                },
                StreamOutputDecl {
                    stream: 0,
                    semantic_name: None,
                    semantic_index: 0,
                    start_component: 0,
                    component_count: 2,
                    output_slot: 0,
                },
            ],
            strides: vec![24],
            rasterized_stream: 0,
        };

        let mut bytes = Vec::new();
        encode_stream_output(Some(&so), &mut bytes);
        let mut reader = CacheReader::new(&bytes);
        assert_eq!(decode_stream_output(&mut reader), Some(so));
        assert!(!reader.has_error());
    }
}

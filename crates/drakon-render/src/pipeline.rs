// SPDX-License-Identifier: CEPL-1.0
//! Backend-neutral description of a graphics pipeline and the cache that
//! turns descriptions into backend pipeline handles.

use anyhow::Result;
use bitflags::bitflags;
use std::{borrow::Cow, collections::HashMap, path::PathBuf};
use tracing::debug;

bitflags! {
    /// Flags the binding layout (root signature / pipeline layout) is derived from.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayoutFlags: u32 {
        const INPUT_ASSEMBLER = 1 << 0;
        const DENY_VERTEX_ROOT_ACCESS = 1 << 1;
        const DENY_PIXEL_ROOT_ACCESS = 1 << 2;
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

impl Default for LayoutFlags {
    fn default() -> Self {
        LayoutFlags::INPUT_ASSEMBLER
    }
}

impl Default for ColorWrites {
    fn default() -> Self {
        ColorWrites::ALL
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    /// One HLSL translation unit holding both entry points.
    Hlsl(Cow<'static, str>),
    /// GLSL files, compiled on first use by the external compiler.
    Glsl { vertex: PathBuf, fragment: PathBuf },
    /// Precompiled SPIR-V modules.
    SpirV {
        vertex: Cow<'static, [u8]>,
        fragment: Cow<'static, [u8]>,
    },
}

impl ShaderSource {
    pub fn is_empty(&self) -> bool {
        match self {
            ShaderSource::Hlsl(text) => text.trim().is_empty(),
            ShaderSource::Glsl { vertex, fragment } => {
                vertex.as_os_str().is_empty() || fragment.as_os_str().is_empty()
            }
            ShaderSource::SpirV { vertex, fragment } => vertex.is_empty() || fragment.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ShaderSource::Hlsl(_) => "hlsl",
            ShaderSource::Glsl { .. } => "glsl",
            ShaderSource::SpirV { .. } => "spir-v",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    Zero,
    #[default]
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl Default for BlendComponent {
    fn default() -> Self {
        BlendComponent {
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
            op: BlendOp::Add,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlendState {
    pub enabled: bool,
    pub color: BlendComponent,
    pub alpha: BlendComponent,
    pub write_mask: ColorWrites,
}

impl BlendState {
    pub fn alpha_blending() -> Self {
        let over = BlendComponent {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            op: BlendOp::Add,
        };
        BlendState {
            enabled: true,
            color: over,
            alpha: over,
            write_mask: ColorWrites::ALL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FrontFace {
    #[default]
    Clockwise,
    CounterClockwise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterState {
    pub fill: FillMode,
    pub cull: CullMode,
    pub front_face: FrontFace,
    pub depth_clip: bool,
}

impl Default for RasterState {
    fn default() -> Self {
        RasterState {
            fill: FillMode::Solid,
            cull: CullMode::Back,
            front_face: FrontFace::Clockwise,
            depth_clip: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub compare: CompareOp,
    pub stencil_test: bool,
}

/// Colour target format a pipeline is built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetFormat {
    /// Whatever the swapchain was created with.
    #[default]
    Swapchain,
    Rgba8Unorm,
    Bgra8Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Immutable pipeline description, compared and hashed by content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    pub shader: Option<ShaderSource>,
    pub vertex_entry: Cow<'static, str>,
    pub fragment_entry: Cow<'static, str>,
    pub layout: LayoutFlags,
    pub blend: BlendState,
    pub raster: RasterState,
    pub depth_stencil: DepthStencilState,
    pub target: TargetFormat,
    pub topology: Topology,
    pub sample_count: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            shader: None,
            vertex_entry: Cow::Borrowed("VSMain"),
            fragment_entry: Cow::Borrowed("PSMain"),
            layout: LayoutFlags::default(),
            blend: BlendState::default(),
            raster: RasterState::default(),
            depth_stencil: DepthStencilState::default(),
            target: TargetFormat::default(),
            topology: Topology::default(),
            sample_count: 1,
        }
    }
}

impl PipelineConfig {
    pub fn hlsl(source: impl Into<Cow<'static, str>>) -> Self {
        PipelineConfig {
            shader: Some(ShaderSource::Hlsl(source.into())),
            ..Default::default()
        }
    }

    pub fn glsl(vertex: impl Into<PathBuf>, fragment: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            shader: Some(ShaderSource::Glsl {
                vertex: vertex.into(),
                fragment: fragment.into(),
            }),
            vertex_entry: Cow::Borrowed("main"),
            fragment_entry: Cow::Borrowed("main"),
            ..Default::default()
        }
    }

    pub fn spirv(
        vertex: impl Into<Cow<'static, [u8]>>,
        fragment: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        PipelineConfig {
            shader: Some(ShaderSource::SpirV {
                vertex: vertex.into(),
                fragment: fragment.into(),
            }),
            vertex_entry: Cow::Borrowed("main"),
            fragment_entry: Cow::Borrowed("main"),
            ..Default::default()
        }
    }

    pub fn with_cull(mut self, cull: CullMode) -> Self {
        self.raster.cull = cull;
        self
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Checks that hold for every backend; backends layer their own on top.
    pub fn validate(&self) -> Result<()> {
        let shader = match &self.shader {
            Some(s) => s,
            None => anyhow::bail!("pipeline has no shader source"),
        };
        anyhow::ensure!(!shader.is_empty(), "{} shader source is empty", shader.kind());
        anyhow::ensure!(
            !self.vertex_entry.is_empty() && !self.fragment_entry.is_empty(),
            "shader entry point names must not be empty"
        );
        anyhow::ensure!(
            self.sample_count.is_power_of_two(),
            "sample count {} is not a power of two",
            self.sample_count
        );
        Ok(())
    }
}

/// Opaque handle to a pipeline owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(u32);

impl PipelineHandle {
    pub const fn new(index: u32) -> Self {
        PipelineHandle(index)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Config → handle map, owned by the renderer and cleared with the device.
///
/// Failed builds are never stored, so the next request runs the whole build
/// again.
#[derive(Debug, Default)]
pub struct PipelineCache {
    entries: HashMap<PipelineConfig, PipelineHandle>,
    epoch: u64,
    builds: u64,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, config: &PipelineConfig) -> Option<PipelineHandle> {
        self.entries.get(config).copied()
    }

    pub fn get_or_build<F>(&mut self, config: &PipelineConfig, build: F) -> Result<PipelineHandle>
    where
        F: FnOnce(&PipelineConfig) -> Result<PipelineHandle>,
    {
        if let Some(handle) = self.get(config) {
            return Ok(handle);
        }
        let handle = build(config)?;
        self.builds += 1;
        self.entries.insert(config.clone(), handle);
        debug!(
            "pipeline {:?} built (epoch {}, {} cached)",
            handle,
            self.epoch,
            self.entries.len()
        );
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Successful builds over the cache's lifetime.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    /// Bumped on every `clear`; handles from an older epoch are stale.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.epoch += 1;
    }
}

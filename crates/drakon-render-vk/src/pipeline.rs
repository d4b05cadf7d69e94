// SPDX-License-Identifier: CEPL-1.0
//! Graphics pipelines built from a [`PipelineConfig`].

use crate::shader::{compile_glsl, load_spirv, load_spirv_file};
use anyhow::{anyhow, bail, ensure, Context, Result};
use ash::vk;
use drakon_render::pipeline::{
    BlendFactor, BlendOp, ColorWrites, CompareOp, CullMode, FillMode, FrontFace, TargetFormat,
    Topology,
};
use drakon_render::{PipelineConfig, ShaderSource};
use std::ffi::CString;

pub(crate) struct VkPipeline {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl VkPipeline {
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_pipeline(self.pipeline, None);
        device.destroy_pipeline_layout(self.layout, None);
    }
}

pub(crate) fn blend_factor(f: BlendFactor) -> vk::BlendFactor {
    match f {
        BlendFactor::Zero => vk::BlendFactor::ZERO,
        BlendFactor::One => vk::BlendFactor::ONE,
        BlendFactor::SrcAlpha => vk::BlendFactor::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => vk::BlendFactor::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => vk::BlendFactor::ONE_MINUS_DST_ALPHA,
    }
}

pub(crate) fn blend_op(op: BlendOp) -> vk::BlendOp {
    match op {
        BlendOp::Add => vk::BlendOp::ADD,
        BlendOp::Subtract => vk::BlendOp::SUBTRACT,
        BlendOp::ReverseSubtract => vk::BlendOp::REVERSE_SUBTRACT,
        BlendOp::Min => vk::BlendOp::MIN,
        BlendOp::Max => vk::BlendOp::MAX,
    }
}

pub(crate) fn color_writes(w: ColorWrites) -> vk::ColorComponentFlags {
    let mut out = vk::ColorComponentFlags::empty();
    for (ours, theirs) in [
        (ColorWrites::RED, vk::ColorComponentFlags::R),
        (ColorWrites::GREEN, vk::ColorComponentFlags::G),
        (ColorWrites::BLUE, vk::ColorComponentFlags::B),
        (ColorWrites::ALPHA, vk::ColorComponentFlags::A),
    ] {
        if w.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub(crate) fn cull_mode(c: CullMode) -> vk::CullModeFlags {
    match c {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub(crate) fn front_face(f: FrontFace) -> vk::FrontFace {
    match f {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub(crate) fn polygon_mode(f: FillMode) -> vk::PolygonMode {
    match f {
        FillMode::Solid => vk::PolygonMode::FILL,
        FillMode::Wireframe => vk::PolygonMode::LINE,
    }
}

pub(crate) fn compare_op(c: CompareOp) -> vk::CompareOp {
    match c {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub(crate) fn topology(t: Topology) -> vk::PrimitiveTopology {
    match t {
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

/// Checks `target` against the render pass's colour format.
pub(crate) fn check_target(target: TargetFormat, swapchain: vk::Format) -> Result<()> {
    let wanted = match target {
        TargetFormat::Swapchain => return Ok(()),
        TargetFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TargetFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
    };
    ensure!(
        wanted == swapchain,
        "pipeline targets {wanted:?} but the swapchain is {swapchain:?}"
    );
    Ok(())
}

/// SPIR-V words for the vertex and fragment stages.
fn stage_code(shader: &ShaderSource) -> Result<(Vec<u32>, Vec<u32>)> {
    match shader {
        ShaderSource::SpirV { vertex, fragment } => Ok((
            load_spirv(vertex).context("vertex stage")?,
            load_spirv(fragment).context("fragment stage")?,
        )),
        ShaderSource::Glsl { vertex, fragment } => {
            let vs = compile_glsl(vertex)?;
            let fs = compile_glsl(fragment)?;
            Ok((load_spirv_file(&vs)?, load_spirv_file(&fs)?))
        }
        ShaderSource::Hlsl(_) => bail!("HLSL shaders are not supported by the Vulkan backend"),
    }
}

unsafe fn create_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    device
        .create_shader_module(&ci, None)
        .context("create_shader_module")
}

/// Layout, then stages, then the pipeline object. Nothing survives a failure.
pub(crate) unsafe fn create_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    color_format: vk::Format,
    config: &PipelineConfig,
) -> Result<VkPipeline> {
    config.validate()?;
    check_target(config.target, color_format)?;
    ensure!(
        config.sample_count == 1,
        "render pass is single-sampled, pipeline wants {} samples",
        config.sample_count
    );
    ensure!(
        config.raster.depth_clip,
        "disabling depth clip needs the depthClamp feature"
    );
    let shader = config
        .shader
        .as_ref()
        .ok_or_else(|| anyhow!("pipeline has no shader source"))?;
    let vs_entry = CString::new(&*config.vertex_entry).context("vertex entry name")?;
    let fs_entry = CString::new(&*config.fragment_entry).context("fragment entry name")?;
    let (vs_code, fs_code) = stage_code(shader)?;

    // 1) layout: no descriptors or push constants
    let layout_info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        ..Default::default()
    };
    let layout = device
        .create_pipeline_layout(&layout_info, None)
        .context("create_pipeline_layout")?;

    // 2) stages
    let vs = match create_module(device, &vs_code) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_pipeline_layout(layout, None);
            return Err(e.context("vertex stage"));
        }
    };
    let fs = match create_module(device, &fs_code) {
        Ok(m) => m,
        Err(e) => {
            device.destroy_shader_module(vs, None);
            device.destroy_pipeline_layout(layout, None);
            return Err(e.context("fragment stage"));
        }
    };

    // 3) pipeline
    let result = build(device, render_pass, layout, vs, fs, &vs_entry, &fs_entry, config);
    device.destroy_shader_module(vs, None);
    device.destroy_shader_module(fs, None);
    match result {
        Ok(pipeline) => Ok(VkPipeline { layout, pipeline }),
        Err(e) => {
            device.destroy_pipeline_layout(layout, None);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
unsafe fn build(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
    vs_entry: &CString,
    fs_entry: &CString,
    config: &PipelineConfig,
) -> Result<vk::Pipeline> {
    let stages = [
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::VERTEX,
            module: vs,
            p_name: vs_entry.as_ptr(),
            ..Default::default()
        },
        vk::PipelineShaderStageCreateInfo {
            s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
            stage: vk::ShaderStageFlags::FRAGMENT,
            module: fs,
            p_name: fs_entry.as_ptr(),
            ..Default::default()
        },
    ];

    // Geometry comes from the vertex index; no vertex buffers.
    let vertex_input = vk::PipelineVertexInputStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
        ..Default::default()
    };
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
        topology: topology(config.topology),
        ..Default::default()
    };
    let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
        dynamic_state_count: dyn_states.len() as u32,
        p_dynamic_states: dyn_states.as_ptr(),
        ..Default::default()
    };
    let viewport_state = vk::PipelineViewportStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
        viewport_count: 1,
        scissor_count: 1,
        ..Default::default()
    };
    let raster = vk::PipelineRasterizationStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
        polygon_mode: polygon_mode(config.raster.fill),
        cull_mode: cull_mode(config.raster.cull),
        front_face: front_face(config.raster.front_face),
        line_width: 1.0,
        ..Default::default()
    };
    let multisample = vk::PipelineMultisampleStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
        rasterization_samples: vk::SampleCountFlags::TYPE_1,
        ..Default::default()
    };
    let ds = config.depth_stencil;
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
        depth_test_enable: ds.depth_test.into(),
        depth_write_enable: ds.depth_write.into(),
        depth_compare_op: compare_op(ds.compare),
        stencil_test_enable: ds.stencil_test.into(),
        ..Default::default()
    };
    let blend = config.blend;
    let color_blend_att = vk::PipelineColorBlendAttachmentState {
        blend_enable: blend.enabled.into(),
        src_color_blend_factor: blend_factor(blend.color.src),
        dst_color_blend_factor: blend_factor(blend.color.dst),
        color_blend_op: blend_op(blend.color.op),
        src_alpha_blend_factor: blend_factor(blend.alpha.src),
        dst_alpha_blend_factor: blend_factor(blend.alpha.dst),
        alpha_blend_op: blend_op(blend.alpha.op),
        color_write_mask: color_writes(blend.write_mask),
    };
    let color_blend = vk::PipelineColorBlendStateCreateInfo {
        s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_blend_att,
        ..Default::default()
    };

    let pipeline_info = vk::GraphicsPipelineCreateInfo {
        s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
        stage_count: stages.len() as u32,
        p_stages: stages.as_ptr(),
        p_vertex_input_state: &vertex_input,
        p_input_assembly_state: &input_assembly,
        p_viewport_state: &viewport_state,
        p_rasterization_state: &raster,
        p_multisample_state: &multisample,
        p_depth_stencil_state: &depth_stencil,
        p_color_blend_state: &color_blend,
        p_dynamic_state: &dynamic_state,
        layout,
        render_pass,
        subpass: 0,
        ..Default::default()
    };

    match device.create_graphics_pipelines(
        vk::PipelineCache::null(),
        std::slice::from_ref(&pipeline_info),
        None,
    ) {
        Ok(p) => p
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing")),
        Err((_, err)) => Err(anyhow!("create_graphics_pipelines failed: {err:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_writes_map_channel_by_channel() {
        assert_eq!(
            color_writes(ColorWrites::ALL),
            vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A
        );
        assert_eq!(
            color_writes(ColorWrites::RED | ColorWrites::ALPHA),
            vk::ColorComponentFlags::R | vk::ColorComponentFlags::A
        );
        assert!(color_writes(ColorWrites::empty()).is_empty());
    }

    #[test]
    fn default_state_maps_to_opaque_back_culled_triangles() {
        let cfg = PipelineConfig::default();
        assert_eq!(cull_mode(cfg.raster.cull), vk::CullModeFlags::BACK);
        assert_eq!(front_face(cfg.raster.front_face), vk::FrontFace::CLOCKWISE);
        assert_eq!(topology(cfg.topology), vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(blend_factor(cfg.blend.color.src), vk::BlendFactor::ONE);
        assert_eq!(blend_factor(cfg.blend.color.dst), vk::BlendFactor::ZERO);
        assert_eq!(compare_op(cfg.depth_stencil.compare), vk::CompareOp::LESS);
    }

    #[test]
    fn explicit_target_must_match_swapchain() {
        let sc = vk::Format::B8G8R8A8_UNORM;
        assert!(check_target(TargetFormat::Swapchain, sc).is_ok());
        assert!(check_target(TargetFormat::Bgra8Unorm, sc).is_ok());
        assert!(check_target(TargetFormat::Rgba8Unorm, sc).is_err());
    }

    #[test]
    fn hlsl_is_refused() {
        let err = stage_code(&ShaderSource::Hlsl("float4 VSMain() {}".into())).unwrap_err();
        assert!(err.to_string().contains("HLSL"));
    }
}

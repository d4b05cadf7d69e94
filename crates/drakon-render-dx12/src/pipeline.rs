// SPDX-License-Identifier: CEPL-1.0
//! Root signature, HLSL compilation and pipeline state objects.

use anyhow::{anyhow, bail, ensure, Context, Result};
use drakon_render::pipeline::{
    BlendFactor, BlendOp, ColorWrites, CompareOp, CullMode, FillMode, FrontFace, LayoutFlags,
    TargetFormat, Topology,
};
use drakon_render::{PipelineConfig, ShaderSource};
use std::ffi::CString;
use windows::core::PCSTR;
use windows::Win32::Graphics::Direct3D::Fxc::{
    D3DCompile, D3DCOMPILE_DEBUG, D3DCOMPILE_SKIP_OPTIMIZATION,
};
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;

pub(crate) struct Dx12Pipeline {
    pub root_signature: ID3D12RootSignature,
    pub state: ID3D12PipelineState,
    pub topology: D3D_PRIMITIVE_TOPOLOGY,
}

pub(crate) fn root_signature_flags(flags: LayoutFlags) -> D3D12_ROOT_SIGNATURE_FLAGS {
    let mut out = D3D12_ROOT_SIGNATURE_FLAG_NONE;
    if flags.contains(LayoutFlags::INPUT_ASSEMBLER) {
        out |= D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT;
    }
    if flags.contains(LayoutFlags::DENY_VERTEX_ROOT_ACCESS) {
        out |= D3D12_ROOT_SIGNATURE_FLAG_DENY_VERTEX_SHADER_ROOT_ACCESS;
    }
    if flags.contains(LayoutFlags::DENY_PIXEL_ROOT_ACCESS) {
        out |= D3D12_ROOT_SIGNATURE_FLAG_DENY_PIXEL_SHADER_ROOT_ACCESS;
    }
    out
}

fn blend(f: BlendFactor) -> D3D12_BLEND {
    match f {
        BlendFactor::Zero => D3D12_BLEND_ZERO,
        BlendFactor::One => D3D12_BLEND_ONE,
        BlendFactor::SrcAlpha => D3D12_BLEND_SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => D3D12_BLEND_INV_SRC_ALPHA,
        BlendFactor::DstAlpha => D3D12_BLEND_DEST_ALPHA,
        BlendFactor::OneMinusDstAlpha => D3D12_BLEND_INV_DEST_ALPHA,
    }
}

fn blend_op(op: BlendOp) -> D3D12_BLEND_OP {
    match op {
        BlendOp::Add => D3D12_BLEND_OP_ADD,
        BlendOp::Subtract => D3D12_BLEND_OP_SUBTRACT,
        BlendOp::ReverseSubtract => D3D12_BLEND_OP_REV_SUBTRACT,
        BlendOp::Min => D3D12_BLEND_OP_MIN,
        BlendOp::Max => D3D12_BLEND_OP_MAX,
    }
}

fn compare(c: CompareOp) -> D3D12_COMPARISON_FUNC {
    match c {
        CompareOp::Never => D3D12_COMPARISON_FUNC_NEVER,
        CompareOp::Less => D3D12_COMPARISON_FUNC_LESS,
        CompareOp::Equal => D3D12_COMPARISON_FUNC_EQUAL,
        CompareOp::LessEqual => D3D12_COMPARISON_FUNC_LESS_EQUAL,
        CompareOp::Greater => D3D12_COMPARISON_FUNC_GREATER,
        CompareOp::NotEqual => D3D12_COMPARISON_FUNC_NOT_EQUAL,
        CompareOp::GreaterEqual => D3D12_COMPARISON_FUNC_GREATER_EQUAL,
        CompareOp::Always => D3D12_COMPARISON_FUNC_ALWAYS,
    }
}

pub(crate) fn topology(t: Topology) -> (D3D12_PRIMITIVE_TOPOLOGY_TYPE, D3D_PRIMITIVE_TOPOLOGY) {
    match t {
        Topology::PointList => (
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
            D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        ),
        Topology::LineList => (
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
            D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        ),
        Topology::LineStrip => (
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
            D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        ),
        Topology::TriangleList => (
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        ),
        Topology::TriangleStrip => (
            D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
            D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
        ),
    }
}

fn write_mask(w: ColorWrites) -> u8 {
    let mut out = 0;
    for (ours, theirs) in [
        (ColorWrites::RED, D3D12_COLOR_WRITE_ENABLE_RED),
        (ColorWrites::GREEN, D3D12_COLOR_WRITE_ENABLE_GREEN),
        (ColorWrites::BLUE, D3D12_COLOR_WRITE_ENABLE_BLUE),
        (ColorWrites::ALPHA, D3D12_COLOR_WRITE_ENABLE_ALPHA),
    ] {
        if w.contains(ours) {
            out |= theirs.0 as u8;
        }
    }
    out
}

fn blob_bytes(blob: &ID3DBlob) -> &[u8] {
    unsafe { std::slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()) }
}

unsafe fn create_root_signature(
    device: &ID3D12Device,
    flags: LayoutFlags,
) -> Result<ID3D12RootSignature> {
    let desc = D3D12_ROOT_SIGNATURE_DESC {
        Flags: root_signature_flags(flags),
        ..Default::default()
    };
    let mut signature = None;
    let mut error = None;
    if let Err(e) = D3D12SerializeRootSignature(
        &desc,
        D3D_ROOT_SIGNATURE_VERSION_1,
        &mut signature,
        Some(&mut error as *mut _),
    ) {
        let detail = error
            .as_ref()
            .map(|b| String::from_utf8_lossy(blob_bytes(b)).into_owned())
            .unwrap_or_default();
        bail!("D3D12SerializeRootSignature: {e} {detail}");
    }
    let signature = signature.ok_or_else(|| anyhow!("root signature blob missing"))?;
    device
        .CreateRootSignature(0, blob_bytes(&signature))
        .context("CreateRootSignature")
}

unsafe fn compile_stage(source: &str, entry: &str, target: &str) -> Result<ID3DBlob> {
    let entry_c = CString::new(entry).context("entry point name")?;
    let target_c = CString::new(target).context("shader target")?;
    let flags = if cfg!(debug_assertions) {
        D3DCOMPILE_DEBUG | D3DCOMPILE_SKIP_OPTIMIZATION
    } else {
        0
    };
    let mut code = None;
    let mut errors = None;
    let result = D3DCompile(
        source.as_ptr().cast(),
        source.len(),
        PCSTR::null(),
        None,
        None,
        PCSTR(entry_c.as_ptr().cast()),
        PCSTR(target_c.as_ptr().cast()),
        flags,
        0,
        &mut code,
        Some(&mut errors as *mut _),
    );
    if let Err(e) = result {
        let detail = errors
            .as_ref()
            .map(|b| String::from_utf8_lossy(blob_bytes(b)).into_owned())
            .unwrap_or_default();
        bail!("D3DCompile({entry}, {target}): {e}: {}", detail.trim_end());
    }
    code.ok_or_else(|| anyhow!("D3DCompile({entry}) produced no bytecode"))
}

fn bytecode(blob: &ID3DBlob) -> D3D12_SHADER_BYTECODE {
    unsafe {
        D3D12_SHADER_BYTECODE {
            pShaderBytecode: blob.GetBufferPointer(),
            BytecodeLength: blob.GetBufferSize(),
        }
    }
}

/// Root signature, then both stages, then the PSO.
pub(crate) unsafe fn create_pipeline(
    device: &ID3D12Device,
    config: &PipelineConfig,
) -> Result<Dx12Pipeline> {
    config.validate()?;
    let source = match &config.shader {
        Some(ShaderSource::Hlsl(text)) => text,
        Some(other) => bail!(
            "{} shaders are not supported by the D3D12 backend",
            other.kind()
        ),
        None => bail!("pipeline has no shader source"),
    };
    let format = match config.target {
        TargetFormat::Swapchain | TargetFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TargetFormat::Bgra8Unorm => bail!("swapchain is R8G8B8A8_UNORM, pipeline wants BGRA8"),
    };
    ensure!(
        !config.depth_stencil.depth_test && !config.depth_stencil.stencil_test,
        "the frame has no depth-stencil target"
    );

    let root_signature = create_root_signature(device, config.layout)?;
    let vs = compile_stage(source, &config.vertex_entry, "vs_5_0")?;
    let ps = compile_stage(source, &config.fragment_entry, "ps_5_0")?;

    let b = config.blend;
    let mut blend_desc = D3D12_BLEND_DESC::default();
    blend_desc.RenderTarget[0] = D3D12_RENDER_TARGET_BLEND_DESC {
        BlendEnable: b.enabled.into(),
        LogicOpEnable: false.into(),
        SrcBlend: blend(b.color.src),
        DestBlend: blend(b.color.dst),
        BlendOp: blend_op(b.color.op),
        SrcBlendAlpha: blend(b.alpha.src),
        DestBlendAlpha: blend(b.alpha.dst),
        BlendOpAlpha: blend_op(b.alpha.op),
        LogicOp: D3D12_LOGIC_OP_NOOP,
        RenderTargetWriteMask: write_mask(b.write_mask),
    };

    let r = config.raster;
    let raster = D3D12_RASTERIZER_DESC {
        FillMode: match r.fill {
            FillMode::Solid => D3D12_FILL_MODE_SOLID,
            FillMode::Wireframe => D3D12_FILL_MODE_WIREFRAME,
        },
        CullMode: match r.cull {
            CullMode::None => D3D12_CULL_MODE_NONE,
            CullMode::Front => D3D12_CULL_MODE_FRONT,
            CullMode::Back => D3D12_CULL_MODE_BACK,
        },
        FrontCounterClockwise: (r.front_face == FrontFace::CounterClockwise).into(),
        DepthClipEnable: r.depth_clip.into(),
        ..Default::default()
    };

    let ds = config.depth_stencil;
    let depth_stencil = D3D12_DEPTH_STENCIL_DESC {
        DepthEnable: ds.depth_test.into(),
        DepthWriteMask: if ds.depth_write {
            D3D12_DEPTH_WRITE_MASK_ALL
        } else {
            D3D12_DEPTH_WRITE_MASK_ZERO
        },
        DepthFunc: compare(ds.compare),
        StencilEnable: ds.stencil_test.into(),
        ..Default::default()
    };

    let (topology_type, topology) = topology(config.topology);
    let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: std::mem::transmute_copy(&root_signature),
        VS: bytecode(&vs),
        PS: bytecode(&ps),
        BlendState: blend_desc,
        SampleMask: u32::MAX,
        RasterizerState: raster,
        DepthStencilState: depth_stencil,
        PrimitiveTopologyType: topology_type,
        NumRenderTargets: 1,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: config.sample_count,
            Quality: 0,
        },
        ..Default::default()
    };
    desc.RTVFormats[0] = format;

    // pRootSignature borrows `root_signature`; ManuallyDrop keeps it unreleased.
    let state: ID3D12PipelineState = device
        .CreateGraphicsPipelineState(&desc)
        .context("CreateGraphicsPipelineState")?;

    Ok(Dx12Pipeline {
        root_signature,
        state,
        topology,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_flags_map_to_root_signature_flags() {
        assert_eq!(
            root_signature_flags(LayoutFlags::default()),
            D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
        );
        assert_eq!(
            root_signature_flags(LayoutFlags::empty()),
            D3D12_ROOT_SIGNATURE_FLAG_NONE
        );
    }

    #[test]
    fn full_write_mask() {
        assert_eq!(write_mask(ColorWrites::ALL), D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8);
    }

    #[test]
    fn triangle_list_topology() {
        let (ty, topo) = topology(Topology::TriangleList);
        assert_eq!(ty, D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE);
        assert_eq!(topo, D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Fixed three-vertex triangle, built lazily on first draw.

use drakon_render::{pipeline::CullMode, DrawContext, Drawable, LazyPipeline, PipelineConfig};

const HLSL: &str = r#"
struct VSOut { float4 pos : SV_Position; float4 color : COLOR0; };

VSOut VSMain(uint id : SV_VertexID) {
    float2 positions[3] = { float2(0.0f, 0.5f), float2(0.5f, -0.5f), float2(-0.5f, -0.5f) };
    float4 colors[3] = { float4(1.0f, 0.0f, 0.0f, 1.0f), float4(0.0f, 1.0f, 0.0f, 1.0f), float4(0.0f, 0.0f, 1.0f, 1.0f) };
    VSOut o;
    o.pos = float4(positions[id], 0.0f, 1.0f);
    o.color = colors[id];
    return o;
}

float4 PSMain(VSOut input) : SV_Target { return input.color; }
"#;

static VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
static FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

pub fn hlsl_config() -> PipelineConfig {
    PipelineConfig::hlsl(HLSL).with_cull(CullMode::None)
}

pub fn spirv_config() -> PipelineConfig {
    PipelineConfig::spirv(VERT_SPV, FRAG_SPV).with_cull(CullMode::None)
}

pub struct Triangle {
    pipeline: LazyPipeline,
}

impl Triangle {
    pub fn new(config: PipelineConfig) -> Self {
        Triangle {
            pipeline: LazyPipeline::new(config),
        }
    }
}

impl Drawable for Triangle {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        // A failed build was already reported; draw nothing this frame.
        let Some(pipeline) = self.pipeline.ensure(ctx) else {
            return;
        };
        ctx.bind_pipeline(pipeline);
        ctx.draw(0..3, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drakon_render::{
        headless::{Command, HeadlessBackend, NoSurface},
        RenderSize, Renderer,
    };

    #[test]
    fn spirv_words_are_aligned() {
        assert_eq!(VERT_SPV.len() % 4, 0);
        assert_eq!(FRAG_SPV.len() % 4, 0);
        // SPIR-V magic, little endian
        assert_eq!(&VERT_SPV[..4], &[0x03, 0x02, 0x23, 0x07]);
    }

    #[test]
    fn draws_three_vertices_with_one_pipeline() {
        let mut r = Renderer::<HeadlessBackend>::new(Default::default(), Default::default());
        let size = RenderSize {
            width: 16,
            height: 16,
        };
        r.init(&NoSurface, &NoSurface, size).unwrap();
        let mut drawables: Vec<Option<Box<dyn Drawable>>> =
            vec![Some(Box::new(Triangle::new(hlsl_config())))];

        for _ in 0..3 {
            r.render(&mut drawables).unwrap();
        }

        let backend = r.backend().unwrap();
        assert_eq!(backend.pipeline_count(), 1);
        let frame = backend.last_frame().unwrap();
        assert_eq!(frame.draw_count(), 1);
        assert!(frame.commands.contains(&Command::Draw {
            vertices: 0..3,
            instances: 0..1,
        }));
    }
}

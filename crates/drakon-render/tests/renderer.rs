// SPDX-License-Identifier: CEPL-1.0
use drakon_render::{
    headless::{Command, Fault, HeadlessBackend, HeadlessSettings, NoSurface},
    Backend, Drawable, DrawContext, FrameStage, LazyPipeline, PipelineConfig, RenderError, RenderSize,
    Renderer, RendererConfig,
};

const SIZE: RenderSize = RenderSize {
    width: 640,
    height: 480,
};

fn renderer(frames: usize, images: usize) -> Renderer<HeadlessBackend> {
    let config = RendererConfig {
        frames_in_flight: frames,
        ..Default::default()
    };
    let settings = HeadlessSettings {
        image_count: images,
        ..Default::default()
    };
    let mut r = Renderer::new(config, settings);
    r.init(&NoSurface, &NoSurface, SIZE).expect("headless init");
    r
}

fn backend(r: &Renderer<HeadlessBackend>) -> &HeadlessBackend {
    r.backend().expect("initialised")
}

struct Triangle {
    pipeline: LazyPipeline,
}

impl Triangle {
    fn boxed(config: PipelineConfig) -> Option<Box<dyn Drawable>> {
        Some(Box::new(Triangle {
            pipeline: LazyPipeline::new(config),
        }))
    }
}

impl Drawable for Triangle {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        if let Some(handle) = self.pipeline.ensure(ctx) {
            ctx.bind_pipeline(handle);
            ctx.draw(0..3, 0..1);
        }
    }
}

fn hlsl() -> PipelineConfig {
    PipelineConfig::hlsl("float4 VSMain(uint id : SV_VertexID) : SV_Position { return 0; }")
}

#[test]
fn empty_frames_cycle_two_slots() {
    let mut r = renderer(2, 2);
    r.set_clear_color([0.25, 0.5, 0.75, 1.0]);

    let slots: Vec<usize> = (0..5)
        .map(|_| r.render(&mut []).expect("frame").slot.index())
        .collect();
    assert_eq!(slots, [0, 1, 0, 1, 0]);

    let b = backend(&r);
    assert_eq!(b.presented(), 5);
    assert!(b
        .journal()
        .iter()
        .all(|f| f.clear_color() == Some([0.25, 0.5, 0.75, 1.0]) && f.draw_count() == 0));
}

#[test]
fn slot_and_image_counters_are_independent() {
    let mut r = renderer(2, 3);
    let frames: Vec<(usize, u32)> = (0..6)
        .map(|_| {
            let info = r.render(&mut []).expect("frame");
            (info.slot.index(), info.image.0)
        })
        .collect();
    assert_eq!(frames, [(0, 0), (1, 1), (0, 2), (1, 0), (0, 1), (1, 2)]);
    assert_eq!(backend(&r).image_count(), 3);
}

#[test]
fn frames_in_flight_never_exceed_slot_count() {
    for frames in 1..=3 {
        let mut r = renderer(frames, 3);
        for _ in 0..10 {
            r.render(&mut []).expect("frame");
        }
        let max = backend(&r).max_in_flight();
        assert!(max <= frames, "{max} in flight with {frames} slots");
        assert_eq!(max, frames);
    }
}

#[test]
fn frame_numbers_count_successful_frames() {
    let mut r = renderer(2, 2);
    assert_eq!(r.render(&mut []).unwrap().frame_number, 0);
    assert_eq!(r.render(&mut []).unwrap().frame_number, 1);
}

#[test]
fn cleanup_is_idempotent() {
    let mut r = renderer(2, 2);
    r.render(&mut []).unwrap();
    r.cleanup().unwrap();
    assert!(!r.is_initialized());
    r.cleanup().unwrap();
    assert!(matches!(r.render(&mut []), Err(RenderError::NotInitialized)));
}

#[test]
fn cleanup_without_init_is_a_no_op() {
    let mut r: Renderer<HeadlessBackend> = Renderer::new(Default::default(), Default::default());
    r.cleanup().unwrap();
    assert_eq!(r.backend_name(), "headless");
}

#[test]
fn failed_init_leaves_nothing_to_render_with() {
    let settings = HeadlessSettings {
        fail_create: true,
        ..Default::default()
    };
    let mut r = Renderer::<HeadlessBackend>::new(Default::default(), settings);
    let err = r.init(&NoSurface, &NoSurface, SIZE).unwrap_err();
    assert!(matches!(err, RenderError::Setup(_)));
    assert!(!r.is_initialized());
    r.cleanup().unwrap();
}

#[test]
fn second_init_is_refused() {
    let mut r = renderer(2, 2);
    assert!(matches!(
        r.init(&NoSurface, &NoSurface, SIZE),
        Err(RenderError::AlreadyInitialized)
    ));
}

#[test]
fn clear_color_reads_back_unchanged() {
    let mut r = renderer(2, 2);
    let rgba = [1.5, -0.25, 0.125, 0.0];
    r.set_clear_color(rgba);
    assert_eq!(r.clear_color(), rgba);
    r.render(&mut []).unwrap();
    assert_eq!(r.clear_color(), rgba);
}

#[test]
fn drawables_run_in_order_and_skip_empty_entries() {
    let mut r = renderer(2, 2);
    let mut drawables = vec![
        Triangle::boxed(hlsl()),
        None,
        Triangle::boxed(hlsl().with_cull(drakon_render::pipeline::CullMode::None)),
    ];
    r.render(&mut drawables).unwrap();

    let frame = backend(&r).last_frame().unwrap();
    assert_eq!(frame.draw_count(), 2);
    assert!(matches!(frame.commands.first(), Some(Command::BeginPass { .. })));
    assert_eq!(frame.commands.last(), Some(&Command::EndPass));
    assert_eq!(backend(&r).pipeline_count(), 2);
    assert_eq!(r.pipelines().len(), 2);
}

#[test]
fn pipeline_builds_once_across_frames() {
    let mut r = renderer(2, 2);
    let mut drawables = vec![Triangle::boxed(hlsl()), Triangle::boxed(hlsl())];
    for _ in 0..8 {
        r.render(&mut drawables).unwrap();
    }
    assert_eq!(backend(&r).pipeline_attempts(), 1);
    assert_eq!(r.pipelines().builds(), 1);
    assert_eq!(backend(&r).last_frame().unwrap().draw_count(), 2);
}

#[test]
fn failed_pipeline_build_blanks_only_that_drawable() {
    let mut r = renderer(2, 2);
    let mut drawables = vec![Triangle::boxed(hlsl())];
    r.backend_mut().unwrap().inject(Fault::PipelineBuild);

    r.render(&mut drawables).expect("frame survives a bad pipeline");
    assert_eq!(backend(&r).last_frame().unwrap().draw_count(), 0);

    r.render(&mut drawables).unwrap();
    assert_eq!(backend(&r).pipeline_attempts(), 2);
    assert_eq!(backend(&r).last_frame().unwrap().draw_count(), 1);
}

#[test]
fn broken_pipeline_retries_every_frame() {
    let mut r = renderer(2, 2);
    let mut drawables = vec![
        Triangle::boxed(PipelineConfig::default()),
        Triangle::boxed(hlsl()),
    ];
    for _ in 0..4 {
        r.render(&mut drawables).unwrap();
    }
    let b = backend(&r);
    // one build for the good pipeline, four for the broken one
    assert_eq!(b.pipeline_attempts(), 5);
    assert_eq!(b.last_frame().unwrap().draw_count(), 1);
}

#[test]
fn failed_submit_discards_and_keeps_the_slot() {
    let mut r = renderer(2, 3);
    r.render(&mut []).unwrap();
    r.backend_mut().unwrap().inject(Fault::Submit);

    let err = r.render(&mut []).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Frame {
            stage: FrameStage::Submit,
            ..
        }
    ));
    assert_eq!(r.current_slot().index(), 1);
    assert_eq!(backend(&r).discarded(), 1);

    let next = r.render(&mut []).unwrap();
    assert_eq!(next.slot.index(), 1);
    for _ in 0..4 {
        r.render(&mut []).unwrap();
    }
}

#[test]
fn failed_record_and_present_do_not_wedge_the_loop() {
    let mut r = renderer(2, 2);
    r.backend_mut().unwrap().inject(Fault::Record);
    assert!(r.render(&mut []).is_err());
    r.backend_mut().unwrap().inject(Fault::Present);
    let err = r.render(&mut []).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Frame {
            stage: FrameStage::Present,
            ..
        }
    ));
    for _ in 0..4 {
        r.render(&mut []).unwrap();
    }
    assert_eq!(backend(&r).presented(), 4);
}

#[test]
fn out_of_date_surface_is_reported_distinctly() {
    let mut r = renderer(2, 2);
    r.backend_mut().unwrap().inject(Fault::OutOfDate);
    let err = r.render(&mut []).unwrap_err();
    assert!(matches!(err, RenderError::SurfaceOutOfDate));
    assert!(err.is_transient());
    r.render(&mut []).unwrap();
}

#[test]
fn reinit_rebuilds_pipelines_for_the_new_device() {
    let mut r = renderer(2, 2);
    let mut drawables = vec![Triangle::boxed(hlsl())];
    r.render(&mut drawables).unwrap();
    r.cleanup().unwrap();
    assert!(r.pipelines().is_empty());

    r.init(&NoSurface, &NoSurface, SIZE).unwrap();
    r.render(&mut drawables).unwrap();
    assert_eq!(backend(&r).pipeline_count(), 1);
    assert_eq!(backend(&r).last_frame().unwrap().draw_count(), 1);
    assert_eq!(r.pipelines().epoch(), 1);
}

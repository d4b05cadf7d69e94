// SPDX-License-Identifier: CEPL-1.0
use drakon_game::{Game, GameContext, GameError, GameLoop, LoopState};
use drakon_platform::{HeadlessPlatform, WindowDesc};
use drakon_render::{
    headless::{Fault, HeadlessBackend, HeadlessSettings},
    DrawContext, Drawable, RenderError, Renderer, RendererConfig,
};
use std::{cell::Cell, rc::Rc};

#[derive(Default)]
struct Script {
    events: Vec<&'static str>,
    deltas: Vec<f64>,
    stop_after: Option<usize>,
}

impl Game for Script {
    fn init(&mut self, _ctx: &mut GameContext<'_>) {
        self.events.push("init");
    }

    fn tick(&mut self, ctx: &mut GameContext<'_>, delta: f64) {
        self.events.push("tick");
        self.deltas.push(delta);
        if self.stop_after == Some(self.deltas.len()) {
            ctx.request_stop();
        }
    }

    fn done(&mut self, _ctx: &mut GameContext<'_>) {
        self.events.push("done");
    }
}

struct Counted {
    draws: Rc<Cell<u32>>,
    drops: Rc<Cell<u32>>,
}

impl Drawable for Counted {
    fn draw(&mut self, ctx: &mut DrawContext<'_>) {
        self.draws.set(self.draws.get() + 1);
        ctx.draw(0..3, 0..1);
    }
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

fn game_loop(
    platform: HeadlessPlatform,
    settings: HeadlessSettings,
) -> GameLoop<HeadlessBackend, HeadlessPlatform> {
    let renderer = Renderer::new(RendererConfig::default(), settings);
    let desc = WindowDesc {
        title: "test".to_owned(),
        width: 64,
        height: 64,
    };
    GameLoop::new(platform, renderer, desc)
}

#[test]
fn hooks_run_in_order_until_stop() {
    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default());
    let mut game = Script {
        stop_after: Some(3),
        ..Default::default()
    };
    let stats = gl.run(&mut game).unwrap();

    assert_eq!(game.events, ["init", "tick", "tick", "tick", "done"]);
    assert_eq!(stats.iterations, 3);
    assert_eq!(stats.frames_rendered, 3);
    assert_eq!(stats.frames_failed, 0);
    assert_eq!(gl.state(), LoopState::Cleaned);
    assert!(!gl.renderer().is_initialized());
    assert_eq!(gl.platform().destroyed(), 1);
}

#[test]
fn first_delta_is_near_zero() {
    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default());
    let mut game = Script {
        stop_after: Some(2),
        ..Default::default()
    };
    gl.run(&mut game).unwrap();
    assert!(game.deltas[0] >= 0.0);
    assert!(game.deltas[0] < 0.05, "first delta {}", game.deltas[0]);
}

#[test]
fn window_failure_skips_the_loop() {
    let mut gl = game_loop(HeadlessPlatform::new().failing(), HeadlessSettings::default());
    let mut game = Script::default();
    let err = gl.run(&mut game).unwrap_err();

    assert!(matches!(err, GameError::Window(_)));
    assert_eq!(game.events, ["init"]);
    assert_eq!(gl.state(), LoopState::Cleaned);
}

#[test]
fn renderer_failure_destroys_the_window() {
    let settings = HeadlessSettings {
        fail_create: true,
        ..Default::default()
    };
    let mut gl = game_loop(HeadlessPlatform::new(), settings);
    let mut game = Script::default();
    let err = gl.run(&mut game).unwrap_err();

    assert!(matches!(err, GameError::Renderer(RenderError::Setup(_))));
    assert_eq!(game.events, ["init"]);
    assert_eq!(gl.platform().destroyed(), 1);
    assert_eq!(gl.state(), LoopState::Cleaned);
}

#[test]
fn failed_frames_do_not_end_the_loop() {
    let settings = HeadlessSettings {
        faults: vec![Fault::Submit, Fault::Present],
        ..Default::default()
    };
    let mut gl = game_loop(HeadlessPlatform::new(), settings).with_max_iterations(5);
    let stats = gl.run(&mut Script::default()).unwrap();

    assert_eq!(stats.iterations, 5);
    assert_eq!(stats.frames_failed, 2);
    assert_eq!(stats.frames_rendered, 3);
}

#[test]
fn platform_exit_ends_the_loop() {
    let mut gl = game_loop(
        HeadlessPlatform::new().with_poll_limit(4),
        HeadlessSettings::default(),
    );
    let mut game = Script::default();
    let stats = gl.run(&mut game).unwrap();

    assert_eq!(stats.iterations, 4);
    assert_eq!(game.events.last(), Some(&"done"));
}

#[test]
fn stop_during_init_runs_no_iterations() {
    struct StopEarly;
    impl Game for StopEarly {
        fn init(&mut self, ctx: &mut GameContext<'_>) {
            ctx.request_stop();
        }
        fn tick(&mut self, _ctx: &mut GameContext<'_>, _delta: f64) {
            panic!("tick after stop");
        }
    }

    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default());
    let stats = gl.run(&mut StopEarly).unwrap();
    assert_eq!(stats.iterations, 0);
    assert_eq!(gl.state(), LoopState::Cleaned);
}

#[test]
fn drawables_draw_every_frame_and_are_dropped_at_cleanup() {
    struct WithTriangle {
        draws: Rc<Cell<u32>>,
        drops: Rc<Cell<u32>>,
    }
    impl Game for WithTriangle {
        fn init(&mut self, ctx: &mut GameContext<'_>) {
            ctx.add_drawable(Box::new(Counted {
                draws: self.draws.clone(),
                drops: self.drops.clone(),
            }));
            ctx.drawables().push(None);
        }
        fn tick(&mut self, _ctx: &mut GameContext<'_>, _delta: f64) {}
    }

    let draws = Rc::new(Cell::new(0));
    let drops = Rc::new(Cell::new(0));
    let mut game = WithTriangle {
        draws: draws.clone(),
        drops: drops.clone(),
    };
    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default())
        .with_max_iterations(3);
    gl.run(&mut game).unwrap();

    assert_eq!(draws.get(), 3);
    assert_eq!(drops.get(), 1);
    assert_eq!(gl.drawable_count(), 0);
}

#[test]
fn clear_color_written_in_tick_reaches_the_renderer() {
    struct Red;
    impl Game for Red {
        fn tick(&mut self, ctx: &mut GameContext<'_>, _delta: f64) {
            ctx.clear_color = [1.0, 0.0, 0.0, 1.0];
            ctx.request_stop();
        }
    }

    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default());
    gl.run(&mut Red).unwrap();
    assert_eq!(gl.renderer().clear_color(), [1.0, 0.0, 0.0, 1.0]);
}

#[test]
fn a_loop_runs_once() {
    let mut gl = game_loop(HeadlessPlatform::new(), HeadlessSettings::default())
        .with_max_iterations(1);
    gl.run(&mut Script::default()).unwrap();
    let err = gl.run(&mut Script::default()).unwrap_err();
    assert!(matches!(err, GameError::AlreadyRan(LoopState::Cleaned)));
}

// SPDX-License-Identifier: CEPL-1.0
//! Game hooks and the loop that drives them against a renderer.

mod clock;
mod game_loop;

pub use clock::FrameClock;
pub use game_loop::{GameError, GameLoop, LoopState, LoopStats};

use drakon_render::Drawable;

/// Hooks a concrete game implements. Only `tick` is required.
pub trait Game {
    /// Called once, before the window exists.
    fn init(&mut self, _ctx: &mut GameContext<'_>) {}

    /// Called once per iteration with the previous iteration's wall-clock
    /// duration in seconds.
    fn tick(&mut self, ctx: &mut GameContext<'_>, delta: f64);

    /// Called once after the loop exits, before cleanup.
    fn done(&mut self, _ctx: &mut GameContext<'_>) {}
}

/// What a hook may touch: the clear colour, the drawable list, and the
/// running flag.
pub struct GameContext<'a> {
    pub clear_color: [f32; 4],
    drawables: &'a mut Vec<Option<Box<dyn Drawable>>>,
    stop_requested: bool,
}

impl<'a> GameContext<'a> {
    pub fn new(clear_color: [f32; 4], drawables: &'a mut Vec<Option<Box<dyn Drawable>>>) -> Self {
        GameContext {
            clear_color,
            drawables,
            stop_requested: false,
        }
    }

    pub fn add_drawable(&mut self, drawable: Box<dyn Drawable>) -> usize {
        self.drawables.push(Some(drawable));
        self.drawables.len() - 1
    }

    /// Slots may be set to `None` to skip a drawable without reordering.
    pub fn drawables(&mut self) -> &mut Vec<Option<Box<dyn Drawable>>> {
        &mut *self.drawables
    }

    pub fn request_stop(&mut self) {
        self.stop_requested = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

// SPDX-License-Identifier: CEPL-1.0
use crate::{clock::FrameClock, Game, GameContext};
use drakon_platform::{Platform, PollStatus, WindowDesc};
use drakon_render::{Backend, Drawable, RenderError, Renderer};
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Created,
    Initializing,
    Running,
    Stopping,
    Cleaned,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoopState::Created => "created",
            LoopState::Initializing => "initializing",
            LoopState::Running => "running",
            LoopState::Stopping => "stopping",
            LoopState::Cleaned => "cleaned",
        })
    }
}

#[derive(Debug, Error)]
pub enum GameError {
    #[error("window creation failed: {0:#}")]
    Window(#[source] anyhow::Error),
    #[error("renderer init failed: {0}")]
    Renderer(#[source] RenderError),
    #[error("game loop already ran (state {0})")]
    AlreadyRan(LoopState),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub iterations: u64,
    pub frames_rendered: u64,
    pub frames_failed: u64,
}

/// Owns the platform window, the renderer and the drawables, and runs
/// `Game` hooks against them on one thread.
pub struct GameLoop<B: Backend, P: Platform> {
    platform: P,
    renderer: Renderer<B>,
    window: WindowDesc,
    drawables: Vec<Option<Box<dyn Drawable>>>,
    state: LoopState,
    max_iterations: Option<u64>,
}

impl<B: Backend, P: Platform> GameLoop<B, P> {
    pub fn new(platform: P, renderer: Renderer<B>, window: WindowDesc) -> Self {
        GameLoop {
            platform,
            renderer,
            window,
            drawables: Vec::new(),
            state: LoopState::Created,
            max_iterations: None,
        }
    }

    /// Stops after `n` iterations even if nothing asked to.
    pub fn with_max_iterations(mut self, n: u64) -> Self {
        self.max_iterations = Some(n);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn renderer(&self) -> &Renderer<B> {
        &self.renderer
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn drawable_count(&self) -> usize {
        self.drawables.len()
    }

    /// Runs `game` until a stop request or a window close, then cleans up.
    ///
    /// A failed frame is logged and counted; it never ends the loop.
    pub fn run<G: Game>(&mut self, game: &mut G) -> Result<LoopStats, GameError> {
        if self.state != LoopState::Created {
            return Err(GameError::AlreadyRan(self.state));
        }
        self.state = LoopState::Initializing;
        let mut running = !self.hook(|ctx| game.init(ctx));

        if let Err(e) = self.platform.create_window(&self.window) {
            error!("window creation failed: {e:#}");
            self.cleanup();
            return Err(GameError::Window(e));
        }
        if let Err(e) = self.init_renderer() {
            self.cleanup();
            return Err(GameError::Renderer(e));
        }

        self.state = LoopState::Running;
        info!("{} game loop running", self.renderer.backend_name());

        let mut stats = LoopStats::default();
        let mut clock = FrameClock::start();
        while running {
            if self.platform.poll_events() == PollStatus::Exit {
                info!("platform requested exit");
                break;
            }
            let delta = clock.tick();
            if self.hook(|ctx| game.tick(ctx, delta)) {
                debug!("stop requested from tick");
                running = false;
            }

            match self.renderer.render(&mut self.drawables) {
                Ok(_) => stats.frames_rendered += 1,
                Err(e) => {
                    // already logged by the renderer
                    debug!("frame {} skipped: {e}", stats.iterations);
                    stats.frames_failed += 1;
                }
            }
            stats.iterations += 1;

            if self.max_iterations.is_some_and(|n| stats.iterations >= n) {
                debug!("iteration limit reached");
                break;
            }
        }

        self.state = LoopState::Stopping;
        self.hook(|ctx| game.done(ctx));
        self.cleanup();
        info!(
            "game loop finished: {} iterations, {} rendered, {} failed",
            stats.iterations, stats.frames_rendered, stats.frames_failed
        );
        Ok(stats)
    }

    fn init_renderer(&mut self) -> Result<(), RenderError> {
        let Some(window) = self.platform.window() else {
            return Err(RenderError::Setup(anyhow::anyhow!(
                "platform reported success without a window"
            )));
        };
        let size = self.platform.window_size().unwrap_or(self.window.size());
        self.renderer.init(window, window, size)
    }

    /// Runs one hook with the renderer's clear colour exposed and written
    /// back. Returns whether the hook asked to stop.
    fn hook(&mut self, f: impl FnOnce(&mut GameContext<'_>)) -> bool {
        let mut ctx = GameContext::new(self.renderer.clear_color(), &mut self.drawables);
        f(&mut ctx);
        let stop = ctx.stop_requested();
        self.renderer.set_clear_color(ctx.clear_color);
        stop
    }

    /// Drawables first, then the renderer, then the window it drew into.
    fn cleanup(&mut self) {
        if self.state == LoopState::Cleaned {
            return;
        }
        self.drawables.clear();
        if let Err(e) = self.renderer.cleanup() {
            warn!("renderer cleanup: {e}");
        }
        self.platform.destroy_window();
        self.state = LoopState::Cleaned;
    }
}

impl<B: Backend, P: Platform> Drop for GameLoop<B, P> {
    fn drop(&mut self) {
        if self.state != LoopState::Created {
            self.cleanup();
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Demo game: one triangle over a clear colour that drifts between black and
//! white, each channel at its own speed.

use crate::triangle::Triangle;
use drakon_game::{Game, GameContext};
use drakon_render::PipelineConfig;
use glam::Vec4;
use tracing::{debug, info};

/// Channel speeds in units per second.
const DRIFT: Vec4 = Vec4::new(0.1, 0.2, 0.3, 0.0);

pub struct HelloGame {
    triangle: Option<PipelineConfig>,
    direction: Vec4,
}

impl HelloGame {
    pub fn new(triangle: PipelineConfig) -> Self {
        HelloGame {
            triangle: Some(triangle),
            direction: DRIFT,
        }
    }
}

/// Moves `color` along `direction`, reflecting channels that leave [0, 1].
fn bounce(color: Vec4, direction: Vec4, delta: f32) -> (Vec4, Vec4) {
    let moved = color + direction * delta;
    let out = moved.cmpgt(Vec4::ONE) | moved.cmplt(Vec4::ZERO);
    (
        moved.clamp(Vec4::ZERO, Vec4::ONE),
        Vec4::select(out, -direction, direction),
    )
}

impl Game for HelloGame {
    fn init(&mut self, ctx: &mut GameContext<'_>) {
        info!("Initializing game");
        if let Some(config) = self.triangle.take() {
            ctx.add_drawable(Box::new(Triangle::new(config)));
        }
    }

    fn tick(&mut self, ctx: &mut GameContext<'_>, delta: f64) {
        debug!("Ticking game after {delta} seconds");
        let (color, direction) = bounce(
            Vec4::from_array(ctx.clear_color),
            self.direction,
            delta as f32,
        );
        ctx.clear_color = color.to_array();
        self.direction = direction;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_drift_at_their_own_speed() {
        let (c, d) = bounce(Vec4::splat(0.5), DRIFT, 1.0);
        assert!(c.abs_diff_eq(Vec4::new(0.6, 0.7, 0.8, 0.5), 1e-6));
        assert_eq!(d, DRIFT);
    }

    #[test]
    fn channels_reflect_at_the_edges() {
        let (c, d) = bounce(Vec4::new(0.95, 0.05, 0.5, 1.0), Vec4::new(0.1, -0.1, 0.0, 0.0), 1.0);
        assert_eq!(c, Vec4::new(1.0, 0.0, 0.5, 1.0));
        assert_eq!(d, Vec4::new(-0.1, 0.1, 0.0, 0.0));
    }

    #[test]
    fn zero_delta_changes_nothing() {
        let start = Vec4::new(0.1, 0.12, 0.18, 1.0);
        let (c, d) = bounce(start, DRIFT, 0.0);
        assert_eq!(c, start);
        assert_eq!(d, DRIFT);
    }
}

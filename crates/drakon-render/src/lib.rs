// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic rendering core: frame lifecycle, pipeline cache and the
//! [`Renderer`] facade that drives one [`Backend`].

pub mod backend;
pub mod drawable;
pub mod error;
pub mod frame;
pub mod headless;
pub mod pipeline;
pub mod renderer;

pub use backend::{Backend, PassEncoder};
pub use drawable::{DrawContext, Drawable, LazyPipeline};
pub use error::{RenderError, SurfaceOutOfDate};
pub use frame::{FrameInfo, FrameSlot, FrameSlots, FrameStage, ImageIndex, DEFAULT_FRAMES_IN_FLIGHT};
pub use pipeline::{PipelineCache, PipelineConfig, PipelineHandle, ShaderSource};
pub use renderer::{Renderer, RendererConfig};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

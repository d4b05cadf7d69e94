// SPDX-License-Identifier: CEPL-1.0
//! The seam between the backend-agnostic renderer and a GPU API.

use crate::{
    frame::{FrameSlot, ImageIndex},
    pipeline::{PipelineConfig, PipelineHandle},
    RenderSize,
};
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::{fmt, ops::Range};

/// Commands available while the frame's single render pass is open.
pub trait PassEncoder {
    /// Size of the image being rendered into.
    fn extent(&self) -> RenderSize;

    /// Builds a pipeline for `config` on the backend's device.
    ///
    /// Runs the whole build every time; callers cache the handle.
    fn create_pipeline(&mut self, config: &PipelineConfig) -> Result<PipelineHandle>;

    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>);
}

/// Device, queues, swapchain and per-slot synchronisation for one GPU API.
///
/// The renderer drives a frame as `wait_for_slot`, `acquire_image`,
/// `reset_slot`, `record`, `submit`, `present`. Slot and image indices are
/// independent: a backend may hand out images in any order.
pub trait Backend: Sized {
    type Settings: Default + Clone + fmt::Debug;

    const NAME: &'static str;

    /// Creates everything up to and including the per-slot sync objects.
    ///
    /// On error nothing created so far may leak.
    fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        frames_in_flight: usize,
        settings: &Self::Settings,
    ) -> Result<Self>;

    fn frames_in_flight(&self) -> usize;

    /// Number of presentable images (M).
    fn image_count(&self) -> usize;

    fn extent(&self) -> RenderSize;

    /// Blocks until the GPU has retired the slot's previous submission.
    fn wait_for_slot(&mut self, slot: FrameSlot) -> Result<()>;

    /// Returns [`crate::SurfaceOutOfDate`] (bare, not wrapped) when the
    /// swapchain no longer matches its surface.
    fn acquire_image(&mut self, slot: FrameSlot) -> Result<ImageIndex>;

    /// Resets the slot's command buffer. Must not touch the fence.
    fn reset_slot(&mut self, slot: FrameSlot) -> Result<()>;

    /// Records the render pass for `image`, cleared to `clear`, calling `draw`
    /// once with the open pass.
    fn record(
        &mut self,
        slot: FrameSlot,
        image: ImageIndex,
        clear: [f32; 4],
        draw: &mut dyn FnMut(&mut dyn PassEncoder),
    ) -> Result<()>;

    /// Resets the slot fence and submits the recorded commands.
    fn submit(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()>;

    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()>;

    /// Gives an acquired image back after a failure before submit, leaving
    /// the slot's fence and signals as if a frame had completed.
    fn discard(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()>;

    fn wait_idle(&mut self) -> Result<()>;

    /// Waits for the GPU and destroys every object in reverse creation order.
    /// A second call is a no-op.
    fn shutdown(&mut self) -> Result<()>;
}

// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic facade over one [`Backend`].

use crate::{
    backend::Backend,
    drawable::{DrawContext, Drawable},
    error::{RenderError, SurfaceOutOfDate},
    frame::{FrameInfo, FrameSlot, FrameSlots, FrameStage, ImageIndex, DEFAULT_FRAMES_IN_FLIGHT},
    pipeline::PipelineCache,
    RenderSize,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    pub frames_in_flight: usize,
    pub clear_color: [f32; 4],
}

impl Default for RendererConfig {
    fn default() -> Self {
        RendererConfig {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

pub struct Renderer<B: Backend> {
    settings: B::Settings,
    backend: Option<B>,
    slots: FrameSlots,
    pipelines: PipelineCache,
    clear_color: [f32; 4],
    frame_number: u64,
}

impl<B: Backend> Renderer<B> {
    pub fn new(config: RendererConfig, settings: B::Settings) -> Self {
        Renderer {
            settings,
            backend: None,
            slots: FrameSlots::new(config.frames_in_flight),
            pipelines: PipelineCache::new(),
            clear_color: config.clear_color,
            frame_number: 0,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        B::NAME
    }

    pub fn is_initialized(&self) -> bool {
        self.backend.is_some()
    }

    pub fn init(
        &mut self,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
    ) -> Result<(), RenderError> {
        if self.backend.is_some() {
            return Err(RenderError::AlreadyInitialized);
        }
        let backend = B::create(window, display, size, self.slots.count(), &self.settings)
            .map_err(|e| {
                error!("{} init failed: {e:#}", B::NAME);
                RenderError::Setup(e)
            })?;
        info!(
            "{} renderer ready: {}x{}, {} images, {} frames in flight",
            B::NAME,
            backend.extent().width,
            backend.extent().height,
            backend.image_count(),
            self.slots.count()
        );
        self.slots.reset();
        self.frame_number = 0;
        self.backend = Some(backend);
        Ok(())
    }

    /// Renders one frame. `None` entries are skipped; the rest draw in order.
    ///
    /// The frame slot only advances when the whole frame succeeds.
    pub fn render(
        &mut self,
        drawables: &mut [Option<Box<dyn Drawable>>],
    ) -> Result<FrameInfo, RenderError> {
        let backend = self.backend.as_mut().ok_or(RenderError::NotInitialized)?;
        let slot = self.slots.current();

        let result = Self::frame(
            backend,
            &mut self.pipelines,
            slot,
            self.clear_color,
            drawables,
        );
        match result {
            Ok(image) => {
                let info = FrameInfo {
                    slot,
                    image,
                    frame_number: self.frame_number,
                };
                self.frame_number += 1;
                self.slots.advance();
                debug!("frame {} presented ({slot}, image {})", info.frame_number, image.0);
                Ok(info)
            }
            Err(e) => {
                error!("{} frame failed on {slot}: {e}", B::NAME);
                Err(e)
            }
        }
    }

    fn frame(
        backend: &mut B,
        pipelines: &mut PipelineCache,
        slot: FrameSlot,
        clear: [f32; 4],
        drawables: &mut [Option<Box<dyn Drawable>>],
    ) -> Result<ImageIndex, RenderError> {
        let at = |stage: FrameStage| move |source: anyhow::Error| RenderError::Frame { stage, source };

        backend
            .wait_for_slot(slot)
            .map_err(at(FrameStage::WaitFence))?;

        let image = backend.acquire_image(slot).map_err(|e| {
            if e.is::<SurfaceOutOfDate>() {
                RenderError::SurfaceOutOfDate
            } else {
                RenderError::Frame {
                    stage: FrameStage::Acquire,
                    source: e,
                }
            }
        })?;

        let recorded = backend
            .reset_slot(slot)
            .map_err(at(FrameStage::Reset))
            .and_then(|()| {
                backend
                    .record(slot, image, clear, &mut |pass| {
                        for drawable in drawables.iter_mut().flatten() {
                            let mut ctx = DrawContext::new(&mut *pass, pipelines);
                            drawable.draw(&mut ctx);
                        }
                    })
                    .map_err(at(FrameStage::Record))
            })
            .and_then(|()| {
                backend
                    .submit(slot, image)
                    .map_err(at(FrameStage::Submit))
            });

        if let Err(e) = recorded {
            if let Err(d) = backend.discard(slot, image) {
                warn!("discarding image {} on {slot} failed: {d:#}", image.0);
            }
            return Err(e);
        }

        backend
            .present(slot, image)
            .map_err(at(FrameStage::Present))?;
        Ok(image)
    }

    /// Waits for the GPU and tears the backend down. Safe to call repeatedly
    /// and on a renderer that never initialised.
    pub fn cleanup(&mut self) -> Result<(), RenderError> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };
        let result = backend.shutdown();
        drop(backend);
        self.pipelines.clear();
        self.slots.reset();
        match result {
            Ok(()) => {
                info!("{} renderer cleaned up", B::NAME);
                Ok(())
            }
            Err(e) => {
                error!("{} teardown failed: {e:#}", B::NAME);
                Err(RenderError::Teardown(e))
            }
        }
    }

    pub fn wait_idle(&mut self) -> Result<(), RenderError> {
        match self.backend.as_mut() {
            Some(b) => b.wait_idle().map_err(|e| RenderError::Frame {
                stage: FrameStage::WaitFence,
                source: e,
            }),
            None => Ok(()),
        }
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn clear_color_mut(&mut self) -> &mut [f32; 4] {
        &mut self.clear_color
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.count()
    }

    pub fn current_slot(&self) -> FrameSlot {
        self.slots.current()
    }

    pub fn pipelines(&self) -> &PipelineCache {
        &self.pipelines
    }

    pub fn backend(&self) -> Option<&B> {
        self.backend.as_ref()
    }

    pub fn backend_mut(&mut self) -> Option<&mut B> {
        self.backend.as_mut()
    }

    pub fn settings(&self) -> &B::Settings {
        &self.settings
    }
}

impl<B: Backend> Drop for Renderer<B> {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

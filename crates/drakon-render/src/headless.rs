// SPDX-License-Identifier: CEPL-1.0
//! A backend with no GPU behind it.
//!
//! It keeps the same per-slot state a real device manager keeps (fences,
//! image-available signals, command buffers, swapchain images) and refuses
//! the same misuse a driver would, so the frame lifecycle can be exercised
//! without a device. Faults can be queued to fail a particular step once.

use crate::{
    backend::{Backend, PassEncoder},
    error::SurfaceOutOfDate,
    frame::{FrameSlot, ImageIndex},
    pipeline::{PipelineConfig, PipelineHandle},
    RenderSize,
};
use anyhow::{bail, ensure, Context, Result};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::{collections::VecDeque, ops::Range};
use tracing::{debug, info};

/// Window stand-in with no native handles, for running without a display.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSurface;

impl HasWindowHandle for NoSurface {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for NoSurface {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

#[derive(Debug, Clone)]
pub struct HeadlessSettings {
    /// Presentable images (M).
    pub image_count: usize,
    /// Fail `create`, as a machine without a usable device would.
    pub fail_create: bool,
    /// Faults queued as soon as the backend exists.
    pub faults: Vec<Fault>,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        HeadlessSettings {
            image_count: 3,
            fail_create: false,
            faults: Vec::new(),
        }
    }
}

/// One-shot failure, consumed by the first matching step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Acquire,
    OutOfDate,
    Record,
    Submit,
    Present,
    PipelineBuild,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    BeginPass { image: ImageIndex, clear: [f32; 4] },
    BindPipeline(PipelineHandle),
    Draw { vertices: Range<u32>, instances: Range<u32> },
    EndPass,
}

#[derive(Debug, Clone)]
pub struct SubmittedFrame {
    pub submission: u64,
    pub slot: FrameSlot,
    pub image: ImageIndex,
    pub commands: Vec<Command>,
}

impl SubmittedFrame {
    pub fn clear_color(&self) -> Option<[f32; 4]> {
        self.commands.iter().find_map(|c| match c {
            Command::BeginPass { clear, .. } => Some(*clear),
            _ => None,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| matches!(c, Command::Draw { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fence {
    Signaled,
    Pending(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmdState {
    Initial,
    Recorded,
    Pending,
}

#[derive(Debug)]
struct Slot {
    fence: Fence,
    /// Set once the CPU has seen the fence signalled since the last submit.
    observed: bool,
    image_available: bool,
    cmd: CmdState,
    commands: Vec<Command>,
}

impl Slot {
    fn new() -> Self {
        Slot {
            fence: Fence::Signaled,
            observed: false,
            image_available: false,
            cmd: CmdState::Initial,
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Image {
    Available,
    Acquired(FrameSlot),
    Rendered(FrameSlot),
}

#[derive(Debug)]
pub struct HeadlessBackend {
    extent: RenderSize,
    slots: Vec<Slot>,
    images: Vec<Image>,
    next_image: usize,
    pipelines: Vec<PipelineConfig>,
    faults: VecDeque<Fault>,
    journal: Vec<SubmittedFrame>,
    submissions: u64,
    max_in_flight: usize,
    pipeline_attempts: u32,
    presented: u64,
    discarded: u64,
    teardowns: u32,
    shut_down: bool,
}

impl HeadlessBackend {
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }

    fn slot(&mut self, slot: FrameSlot) -> Result<&mut Slot> {
        ensure!(!self.shut_down, "backend is shut down");
        self.slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))
    }

    fn image(&mut self, image: ImageIndex) -> Result<&mut Image> {
        self.images
            .get_mut(image.index())
            .with_context(|| format!("image {} out of range", image.0))
    }

    fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.fence, Fence::Pending(_)))
            .count()
    }

    /// Every submitted frame, oldest first.
    pub fn journal(&self) -> &[SubmittedFrame] {
        &self.journal
    }

    pub fn last_frame(&self) -> Option<&SubmittedFrame> {
        self.journal.last()
    }

    /// Highest number of simultaneously pending fences seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    pub fn pipeline_attempts(&self) -> u32 {
        self.pipeline_attempts
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn teardowns(&self) -> u32 {
        self.teardowns
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

struct HeadlessPass<'a> {
    extent: RenderSize,
    commands: &'a mut Vec<Command>,
    pipelines: &'a mut Vec<PipelineConfig>,
    attempts: &'a mut u32,
    fail_build: bool,
}

impl PassEncoder for HeadlessPass<'_> {
    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn create_pipeline(&mut self, config: &PipelineConfig) -> Result<PipelineHandle> {
        *self.attempts += 1;
        if std::mem::take(&mut self.fail_build) {
            bail!("injected pipeline build failure");
        }
        config.validate().context("creating pipeline")?;
        let index = u32::try_from(self.pipelines.len()).context("too many pipelines")?;
        self.pipelines.push(config.clone());
        Ok(PipelineHandle::new(index))
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(Command::BindPipeline(pipeline));
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.commands.push(Command::Draw {
            vertices,
            instances,
        });
    }
}

impl Backend for HeadlessBackend {
    type Settings = HeadlessSettings;

    const NAME: &'static str = "headless";

    fn create(
        _window: &dyn HasWindowHandle,
        _display: &dyn HasDisplayHandle,
        size: RenderSize,
        frames_in_flight: usize,
        settings: &HeadlessSettings,
    ) -> Result<Self> {
        ensure!(!settings.fail_create, "no compatible device");
        let frames = frames_in_flight.max(1);
        ensure!(
            settings.image_count >= frames,
            "{} images cannot back {frames} frames in flight",
            settings.image_count
        );
        info!(
            "headless device: {}x{}, {} images",
            size.width, size.height, settings.image_count
        );
        Ok(HeadlessBackend {
            extent: size,
            slots: (0..frames).map(|_| Slot::new()).collect(),
            images: vec![Image::Available; settings.image_count],
            next_image: 0,
            pipelines: Vec::new(),
            faults: settings.faults.iter().copied().collect(),
            journal: Vec::new(),
            submissions: 0,
            max_in_flight: 0,
            pipeline_attempts: 0,
            presented: 0,
            discarded: 0,
            teardowns: 0,
            shut_down: false,
        })
    }

    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let s = self.slot(slot)?;
        if let Fence::Pending(submission) = s.fence {
            debug!("retiring submission {submission} on {slot}");
            s.fence = Fence::Signaled;
            s.cmd = CmdState::Initial;
        }
        s.observed = true;
        Ok(())
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> Result<ImageIndex> {
        ensure!(!self.shut_down, "backend is shut down");
        if self.take_fault(Fault::OutOfDate) {
            return Err(SurfaceOutOfDate.into());
        }
        if self.take_fault(Fault::Acquire) {
            bail!("injected acquire failure");
        }
        let s = self.slot(slot)?;
        ensure!(
            !s.image_available,
            "{slot} image-available signal is still pending"
        );

        let index = self.next_image;
        let image = self.image(ImageIndex(index as u32))?;
        ensure!(
            *image == Image::Available,
            "image {index} is still in use ({image:?})"
        );
        *image = Image::Acquired(slot);
        self.next_image = (index + 1) % self.images.len();
        self.slot(slot)?.image_available = true;
        Ok(ImageIndex(index as u32))
    }

    fn reset_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let s = self.slot(slot)?;
        ensure!(
            s.observed && s.fence == Fence::Signaled,
            "{slot} command buffer reset before its fence was seen signalled"
        );
        ensure!(s.cmd != CmdState::Pending, "{slot} command buffer is pending");
        s.cmd = CmdState::Initial;
        s.commands.clear();
        Ok(())
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image: ImageIndex,
        clear: [f32; 4],
        draw: &mut dyn FnMut(&mut dyn PassEncoder),
    ) -> Result<()> {
        ensure!(
            *self.image(image)? == Image::Acquired(slot),
            "recording into image {} not acquired by {slot}",
            image.0
        );
        if self.take_fault(Fault::Record) {
            bail!("injected record failure");
        }
        let fail_build = self.take_fault(Fault::PipelineBuild);
        let extent = self.extent;

        let HeadlessBackend {
            slots,
            pipelines,
            pipeline_attempts,
            ..
        } = self;
        let s = slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        ensure!(s.cmd == CmdState::Initial, "{slot} command buffer was not reset");

        s.commands.push(Command::BeginPass { image, clear });
        let mut pass = HeadlessPass {
            extent,
            commands: &mut s.commands,
            pipelines,
            attempts: pipeline_attempts,
            fail_build,
        };
        draw(&mut pass);
        s.commands.push(Command::EndPass);
        s.cmd = CmdState::Recorded;
        Ok(())
    }

    fn submit(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        if self.take_fault(Fault::Submit) {
            bail!("injected submit failure");
        }
        let submission = self.submissions;
        let s = self.slot(slot)?;
        ensure!(s.cmd == CmdState::Recorded, "{slot} has nothing recorded");
        ensure!(s.image_available, "{slot} has no image-available signal to wait on");
        s.image_available = false;
        s.fence = Fence::Pending(submission);
        s.observed = false;
        s.cmd = CmdState::Pending;
        let commands = s.commands.clone();

        *self.image(image)? = Image::Rendered(slot);
        self.submissions += 1;
        self.max_in_flight = self.max_in_flight.max(self.in_flight());
        self.journal.push(SubmittedFrame {
            submission,
            slot,
            image,
            commands,
        });
        Ok(())
    }

    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        ensure!(
            *self.image(image)? == Image::Rendered(slot),
            "presenting image {} that {slot} did not render",
            image.0
        );
        // A failed present still releases the image, as vkQueuePresentKHR does.
        *self.image(image)? = Image::Available;
        if self.take_fault(Fault::Present) {
            bail!("injected present failure");
        }
        self.presented += 1;
        Ok(())
    }

    fn discard(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        let s = self.slot(slot)?;
        s.image_available = false;
        s.cmd = CmdState::Initial;
        s.commands.clear();
        *self.image(image)? = Image::Available;
        self.discarded += 1;
        debug!("discarded image {} on {slot}", image.0);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        for s in &mut self.slots {
            if let Fence::Pending(_) = s.fence {
                s.fence = Fence::Signaled;
                s.cmd = CmdState::Initial;
            }
            s.observed = true;
        }
        Ok(())
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            return Ok(());
        }
        self.wait_idle()?;
        self.pipelines.clear();
        self.slots.clear();
        self.images.clear();
        self.shut_down = true;
        self.teardowns += 1;
        info!("headless device destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(frames: usize, images: usize) -> HeadlessBackend {
        let settings = HeadlessSettings {
            image_count: images,
            ..Default::default()
        };
        let size = RenderSize {
            width: 320,
            height: 240,
        };
        HeadlessBackend::create(&NoSurface, &NoSurface, size, frames, &settings).unwrap()
    }

    fn frame(b: &mut HeadlessBackend, slot: FrameSlot) -> Result<ImageIndex> {
        b.wait_for_slot(slot)?;
        let image = b.acquire_image(slot)?;
        b.reset_slot(slot)?;
        b.record(slot, image, [0.0; 4], &mut |_| {})?;
        b.submit(slot, image)?;
        b.present(slot, image)?;
        Ok(image)
    }

    #[test]
    fn reset_before_wait_is_refused() {
        let mut b = backend(2, 3);
        let slot = FrameSlot::new(0);
        b.acquire_image(slot).unwrap();
        assert!(b.reset_slot(slot).is_err());
    }

    #[test]
    fn slot_is_pending_until_waited() {
        let mut b = backend(2, 3);
        let slot = FrameSlot::new(0);
        frame(&mut b, slot).unwrap();
        assert_eq!(b.in_flight(), 1);
        assert!(b.reset_slot(slot).is_err());
        b.wait_for_slot(slot).unwrap();
        assert_eq!(b.in_flight(), 0);
    }

    #[test]
    fn too_few_images_is_a_setup_error() {
        let settings = HeadlessSettings {
            image_count: 1,
            ..Default::default()
        };
        let size = RenderSize {
            width: 1,
            height: 1,
        };
        assert!(HeadlessBackend::create(&NoSurface, &NoSurface, size, 2, &settings).is_err());
    }

    #[test]
    fn faults_fire_once() {
        let mut b = backend(1, 2);
        let slot = FrameSlot::new(0);
        b.inject(Fault::Acquire);
        assert!(frame(&mut b, slot).is_err());
        assert!(frame(&mut b, slot).is_ok());
    }

    #[test]
    fn out_of_date_is_typed() {
        let mut b = backend(1, 2);
        b.inject(Fault::OutOfDate);
        let err = b.acquire_image(FrameSlot::new(0)).unwrap_err();
        assert!(err.is::<SurfaceOutOfDate>());
    }

    #[test]
    fn shutdown_tears_down_once() {
        let mut b = backend(2, 3);
        b.shutdown().unwrap();
        b.shutdown().unwrap();
        assert_eq!(b.teardowns(), 1);
        assert!(b.acquire_image(FrameSlot::new(0)).is_err());
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Vulkan device and swapchain manager.

mod device;
mod instance;
mod pipeline;
pub mod shader;
mod swapchain;

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain as khr_swapchain};
use ash::{vk, Entry, Instance};
use device::Queues;
use drakon_render::{
    Backend, FrameSlot, ImageIndex, PassEncoder, PipelineConfig, PipelineHandle, RenderSize,
    SurfaceOutOfDate,
};
use instance::DebugMessenger;
use pipeline::VkPipeline;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ops::Range;
use tracing::{debug, info, warn};

pub use shader::{compile_glsl, spirv_path_for, GLSLC_ENV};

#[derive(Clone, Debug)]
pub struct VkSettings {
    /// FIFO when on, MAILBOX (if offered) when off.
    pub vsync: bool,
    /// Require the Khronos validation layer and forward its messages.
    pub validation: bool,
}

impl Default for VkSettings {
    fn default() -> Self {
        VkSettings {
            vsync: true,
            validation: false,
        }
    }
}

#[derive(Clone, Copy)]
struct FrameSync {
    cmd: vk::CommandBuffer,
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

pub struct VkBackend {
    _entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,

    device: Option<ash::Device>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    swapchain_loader: Option<khr_swapchain::Device>,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,

    cmd_pool: vk::CommandPool,
    frames: Vec<FrameSync>,
    pipelines: Vec<VkPipeline>,
    destroyed: bool,
}

unsafe fn create_frame_sync(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<FrameSync> {
    let sem_ci = vk::SemaphoreCreateInfo::default();
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    let image_available = device
        .create_semaphore(&sem_ci, None)
        .context("create_semaphore(image available)")?;
    let render_finished = match device.create_semaphore(&sem_ci, None) {
        Ok(s) => s,
        Err(e) => {
            device.destroy_semaphore(image_available, None);
            return Err(e).context("create_semaphore(render finished)");
        }
    };
    let in_flight = match device.create_fence(&fence_ci, None) {
        Ok(f) => f,
        Err(e) => {
            device.destroy_semaphore(render_finished, None);
            device.destroy_semaphore(image_available, None);
            return Err(e).context("create_fence(in flight)");
        }
    };
    Ok(FrameSync {
        cmd,
        image_available,
        render_finished,
        in_flight,
    })
}

/// Opens the command buffer and the frame's render pass with a full-target
/// viewport and scissor.
unsafe fn begin_pass(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
    clear: [f32; 4],
) -> Result<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device
        .begin_command_buffer(cmd, &begin)
        .context("begin_command_buffer")?;

    let clear_value = vk::ClearValue {
        color: vk::ClearColorValue { float32: clear },
    };
    let rp_begin = vk::RenderPassBeginInfo {
        s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
        render_pass,
        framebuffer,
        render_area: vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
        clear_value_count: 1,
        p_clear_values: &clear_value,
        ..Default::default()
    };
    device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };
    let scissor = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    };
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&viewport));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&scissor));
    Ok(())
}

unsafe fn end_pass(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    device.cmd_end_render_pass(cmd);
    device
        .end_command_buffer(cmd)
        .context("end_command_buffer")
}

struct VkPass<'a> {
    device: &'a ash::Device,
    cmd: vk::CommandBuffer,
    render_pass: vk::RenderPass,
    format: vk::Format,
    extent: vk::Extent2D,
    pipelines: &'a mut Vec<VkPipeline>,
}

impl PassEncoder for VkPass<'_> {
    fn extent(&self) -> RenderSize {
        RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    fn create_pipeline(&mut self, config: &PipelineConfig) -> Result<PipelineHandle> {
        let index = u32::try_from(self.pipelines.len()).context("too many pipelines")?;
        let built = unsafe {
            pipeline::create_pipeline(self.device, self.render_pass, self.format, config)?
        };
        self.pipelines.push(built);
        debug!("vk pipeline {index} created");
        Ok(PipelineHandle::new(index))
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        match self.pipelines.get(pipeline.index()) {
            Some(p) => unsafe {
                self.device
                    .cmd_bind_pipeline(self.cmd, vk::PipelineBindPoint::GRAPHICS, p.pipeline);
            },
            None => warn!("bind of unknown pipeline {pipeline:?} ignored"),
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        unsafe {
            self.device.cmd_draw(
                self.cmd,
                vertices.end.saturating_sub(vertices.start),
                instances.end.saturating_sub(instances.start),
                vertices.start,
                instances.start,
            );
        }
    }
}

impl VkBackend {
    fn device(&self) -> Result<&ash::Device> {
        self.device.as_ref().context("vk device already destroyed")
    }

    fn swapchain_loader(&self) -> Result<&khr_swapchain::Device> {
        self.swapchain_loader
            .as_ref()
            .context("vk swapchain already destroyed")
    }

    fn frame(&self, slot: FrameSlot) -> Result<FrameSync> {
        self.frames
            .get(slot.index())
            .copied()
            .with_context(|| format!("{slot} has no sync objects"))
    }

    fn framebuffer(&self, image: ImageIndex) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image.index())
            .copied()
            .with_context(|| format!("no framebuffer for image {}", image.0))
    }

    /// Everything from device selection to the per-slot sync objects.
    unsafe fn create_device_objects(
        &mut self,
        size: RenderSize,
        frames_in_flight: usize,
        settings: &VkSettings,
    ) -> Result<()> {
        let (phys, families) =
            device::pick_physical_device(&self.instance, &self.surface_loader, self.surface)?;

        let (device, Queues { graphics, present }) =
            device::create_device(&self.instance, phys, families)?;
        self.graphics_queue = graphics;
        self.present_queue = present;
        self.swapchain_loader = Some(khr_swapchain::Device::new(&self.instance, &device));
        let device = self.device.insert(device);
        let swap_d = self
            .swapchain_loader
            .as_ref()
            .ok_or_else(|| anyhow!("swapchain loader missing"))?;

        let bundle = swapchain::create_swapchain(
            &self.surface_loader,
            swap_d,
            phys,
            self.surface,
            families,
            size,
            settings.vsync,
        )?;
        self.swapchain = bundle.swapchain;
        self.format = bundle.format;
        self.extent = bundle.extent;
        self.images = bundle.images;

        for &image in &self.images {
            let view = swapchain::create_image_view(device, image, self.format)?;
            self.image_views.push(view);
        }
        self.render_pass = swapchain::create_render_pass(device, self.format)?;
        for &view in &self.image_views {
            let fb = swapchain::create_framebuffer(device, self.render_pass, view, self.extent)?;
            self.framebuffers.push(fb);
        }

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: families.graphics,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            ..Default::default()
        };
        self.cmd_pool = device
            .create_command_pool(&pool_info, None)
            .context("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: frames_in_flight as u32,
            ..Default::default()
        };
        let cmds = device
            .allocate_command_buffers(&alloc_info)
            .context("allocate_command_buffers")?;
        for cmd in cmds {
            let sync = create_frame_sync(device, cmd)?;
            self.frames.push(sync);
        }
        Ok(())
    }

    // STRICT TEARDOWN ORDER:
    // - device_wait_idle() so nothing in flight references what follows
    // - per-slot semaphores and fences
    // - framebuffers, render pass, image views, then the swapchain
    // - pipelines and layouts, command pool (frees its buffers), device
    // - debug messenger, surface, instance last
    // Null handles were never created and are skipped.
    unsafe fn destroy(&mut self) -> Result<()> {
        if self.destroyed {
            return Ok(());
        }
        self.destroyed = true;
        let mut idle = Ok(());

        if let Some(d) = self.device.take() {
            idle = d.device_wait_idle().context("device_wait_idle");

            for f in self.frames.drain(..) {
                d.destroy_fence(f.in_flight, None);
                d.destroy_semaphore(f.render_finished, None);
                d.destroy_semaphore(f.image_available, None);
            }
            for fb in self.framebuffers.drain(..) {
                d.destroy_framebuffer(fb, None);
            }
            if self.render_pass != vk::RenderPass::null() {
                d.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
            for iv in self.image_views.drain(..) {
                d.destroy_image_view(iv, None);
            }
            if let Some(loader) = self.swapchain_loader.take() {
                if self.swapchain != vk::SwapchainKHR::null() {
                    loader.destroy_swapchain(self.swapchain, None);
                    self.swapchain = vk::SwapchainKHR::null();
                }
            }
            self.images.clear();
            for p in self.pipelines.drain(..) {
                p.destroy(&d);
            }
            if self.cmd_pool != vk::CommandPool::null() {
                d.destroy_command_pool(self.cmd_pool, None);
                self.cmd_pool = vk::CommandPool::null();
            }
            d.destroy_device(None);
        }

        if let Some(dbg) = self.debug.take() {
            dbg.destroy();
        }
        if self.surface != vk::SurfaceKHR::null() {
            self.surface_loader.destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
        }
        self.instance.destroy_instance(None);
        info!("vk backend destroyed");
        idle
    }

    unsafe fn submit_frame(&self, frame: FrameSync) -> Result<()> {
        let device = self.device()?;
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.image_available,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &frame.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &frame.render_finished,
            ..Default::default()
        };
        device
            .reset_fences(&[frame.in_flight])
            .context("reset_fences")?;
        device
            .queue_submit(
                self.graphics_queue,
                std::slice::from_ref(&submit),
                frame.in_flight,
            )
            .context("queue_submit")
    }
}

impl Backend for VkBackend {
    type Settings = VkSettings;

    const NAME: &'static str = "vulkan";

    fn create(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        frames_in_flight: usize,
        settings: &VkSettings,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("display handle: {e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("window handle: {e}"))?
            .as_raw();

        unsafe {
            let entry = Entry::load().map_err(|e| anyhow!("loading the Vulkan library: {e}"))?;
            let validation = instance::want_validation(&entry, settings.validation)?;
            let instance = instance::create_instance(&entry, dh, validation)?;

            let debug = if validation {
                match instance::create_debug_messenger(&entry, &instance) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        instance.destroy_instance(None);
                        return Err(e);
                    }
                }
            } else {
                None
            };

            let surface_loader = surface::Instance::new(&entry, &instance);
            let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
                Ok(s) => s,
                Err(e) => {
                    if let Some(d) = &debug {
                        d.destroy();
                    }
                    instance.destroy_instance(None);
                    return Err(e).context("ash_window::create_surface");
                }
            };

            // From here on Drop cleans up whatever exists.
            let mut backend = VkBackend {
                _entry: entry,
                instance,
                debug,
                surface_loader,
                surface,
                device: None,
                graphics_queue: vk::Queue::null(),
                present_queue: vk::Queue::null(),
                swapchain_loader: None,
                swapchain: vk::SwapchainKHR::null(),
                format: vk::Format::UNDEFINED,
                extent: vk::Extent2D::default(),
                images: Vec::new(),
                image_views: Vec::new(),
                render_pass: vk::RenderPass::null(),
                framebuffers: Vec::new(),
                cmd_pool: vk::CommandPool::null(),
                frames: Vec::new(),
                pipelines: Vec::new(),
                destroyed: false,
            };
            backend.create_device_objects(size, frames_in_flight.max(1), settings)?;
            Ok(backend)
        }
    }

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn extent(&self) -> RenderSize {
        RenderSize {
            width: self.extent.width,
            height: self.extent.height,
        }
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let frame = self.frame(slot)?;
        unsafe {
            self.device()?
                .wait_for_fences(&[frame.in_flight], true, u64::MAX)
                .context("wait_for_fences(in flight)")
        }
    }

    fn acquire_image(&mut self, slot: FrameSlot) -> Result<ImageIndex> {
        let frame = self.frame(slot)?;
        let loader = self.swapchain_loader()?;
        let acquired = unsafe {
            loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                frame.image_available,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    debug!("acquire: swapchain suboptimal");
                }
                Ok(ImageIndex(index))
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SurfaceOutOfDate.into()),
            Err(e) => Err(e).context("acquire_next_image"),
        }
    }

    fn reset_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let frame = self.frame(slot)?;
        unsafe {
            self.device()?
                .reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer")
        }
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image: ImageIndex,
        clear: [f32; 4],
        draw: &mut dyn FnMut(&mut dyn PassEncoder),
    ) -> Result<()> {
        let frame = self.frame(slot)?;
        let framebuffer = self.framebuffer(image)?;
        let VkBackend {
            device,
            pipelines,
            render_pass,
            format,
            extent,
            ..
        } = self;
        let device = device.as_ref().context("vk device already destroyed")?;
        unsafe {
            begin_pass(device, frame.cmd, *render_pass, framebuffer, *extent, clear)?;
            let mut pass = VkPass {
                device,
                cmd: frame.cmd,
                render_pass: *render_pass,
                format: *format,
                extent: *extent,
                pipelines,
            };
            draw(&mut pass);
            end_pass(device, frame.cmd)
        }
    }

    fn submit(&mut self, slot: FrameSlot, _image: ImageIndex) -> Result<()> {
        let frame = self.frame(slot)?;
        unsafe { self.submit_frame(frame) }
    }

    fn present(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        let frame = self.frame(slot)?;
        let loader = self.swapchain_loader()?;
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &frame.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.swapchain,
            p_image_indices: &image.0,
            ..Default::default()
        };
        match unsafe { loader.queue_present(self.present_queue, &present) } {
            Ok(suboptimal) => {
                if suboptimal {
                    debug!("present: swapchain suboptimal");
                }
                Ok(())
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Err(SurfaceOutOfDate.into()),
            Err(e) => Err(e).context("queue_present"),
        }
    }

    /// Re-records a clear-only pass and pushes it through submit and present,
    /// consuming the acquire semaphore and signalling the slot fence.
    fn discard(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        let frame = self.frame(slot)?;
        let framebuffer = self.framebuffer(image)?;
        unsafe {
            let device = self.device()?;
            device
                .reset_command_buffer(frame.cmd, vk::CommandBufferResetFlags::empty())
                .context("reset_command_buffer(discard)")?;
            begin_pass(
                device,
                frame.cmd,
                self.render_pass,
                framebuffer,
                self.extent,
                [0.0, 0.0, 0.0, 1.0],
            )?;
            end_pass(device, frame.cmd)?;
            self.submit_frame(frame)?;
        }
        self.present(slot, image)
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device()?.device_wait_idle().context("device_wait_idle") }
    }

    fn shutdown(&mut self) -> Result<()> {
        unsafe { self.destroy() }
    }
}

impl Drop for VkBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.destroy() } {
            warn!("vk teardown: {e:#}");
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Direct3D 12 device and swapchain manager.
//!
//! One command allocator and list per frame slot, one shared fence with a
//! per-slot target value. Image availability and render completion are
//! implied by queue ordering, so acquire is just the current back buffer.
#![cfg(windows)]

mod pipeline;

use anyhow::{anyhow, bail, Context, Result};
use drakon_render::{
    Backend, FrameSlot, ImageIndex, PassEncoder, PipelineConfig, PipelineHandle, RenderSize,
};
use pipeline::Dx12Pipeline;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use std::{ffi::c_void, mem::ManuallyDrop, ops::Range};
use tracing::{debug, info, warn};
use windows::core::{Interface, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE, HWND, RECT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

#[derive(Clone, Debug)]
pub struct Dx12Settings {
    /// Present with sync interval 1 when on, 0 when off.
    pub vsync: bool,
}

impl Default for Dx12Settings {
    fn default() -> Self {
        Dx12Settings { vsync: true }
    }
}

struct Slot {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence_value: u64,
    open: bool,
}

// Fields drop in declaration order, newest objects first.
struct Gpu {
    pipelines: Vec<Dx12Pipeline>,
    slots: Vec<Slot>,
    fence: ID3D12Fence,
    render_targets: Vec<ID3D12Resource>,
    rtv_heap: ID3D12DescriptorHeap,
    swap_chain: IDXGISwapChain3,
    queue: ID3D12CommandQueue,
    device: ID3D12Device,
    _factory: IDXGIFactory4,
}

pub struct Dx12Backend {
    gpu: Option<Gpu>,
    fence_event: HANDLE,
    next_fence_value: u64,
    rtv_descriptor_size: usize,
    extent: RenderSize,
    sync_interval: u32,
}

fn adapter_name(desc: &DXGI_ADAPTER_DESC1) -> String {
    let len = desc
        .Description
        .iter()
        .position(|&c| c == 0)
        .unwrap_or(desc.Description.len());
    String::from_utf16_lossy(&desc.Description[..len])
}

/// First hardware adapter with feature level 11_0, else WARP.
unsafe fn create_device(factory: &IDXGIFactory4) -> Result<ID3D12Device> {
    for i in 0.. {
        let Ok(adapter) = factory.EnumAdapters1(i) else {
            break;
        };
        let desc = adapter.GetDesc1().context("GetDesc1")?;
        if desc.Flags & DXGI_ADAPTER_FLAG_SOFTWARE.0 as u32 != 0 {
            continue;
        }
        let mut device: Option<ID3D12Device> = None;
        if D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device).is_ok() {
            if let Some(device) = device {
                info!("d3d12 adapter: {}", adapter_name(&desc));
                return Ok(device);
            }
        }
    }

    warn!("no hardware adapter supports feature level 11_0, using WARP");
    let warp: IDXGIAdapter = factory.EnumWarpAdapter().context("EnumWarpAdapter")?;
    let mut device: Option<ID3D12Device> = None;
    D3D12CreateDevice(&warp, D3D_FEATURE_LEVEL_11_0, &mut device)
        .context("D3D12CreateDevice(WARP)")?;
    device.ok_or_else(|| anyhow!("D3D12CreateDevice returned no device"))
}

fn transition_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: unsafe { std::mem::transmute_copy(resource) },
                StateBefore: before,
                StateAfter: after,
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
            }),
        },
    }
}

unsafe fn wait_for(fence: &ID3D12Fence, event: HANDLE, value: u64) -> Result<()> {
    if fence.GetCompletedValue() < value {
        fence
            .SetEventOnCompletion(value, event)
            .context("SetEventOnCompletion")?;
        WaitForSingleObject(event, INFINITE);
    }
    Ok(())
}

struct Dx12Pass<'a> {
    device: &'a ID3D12Device,
    list: &'a ID3D12GraphicsCommandList,
    pipelines: &'a mut Vec<Dx12Pipeline>,
    extent: RenderSize,
}

impl PassEncoder for Dx12Pass<'_> {
    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn create_pipeline(&mut self, config: &PipelineConfig) -> Result<PipelineHandle> {
        let index = u32::try_from(self.pipelines.len()).context("too many pipelines")?;
        let built = unsafe { pipeline::create_pipeline(self.device, config)? };
        self.pipelines.push(built);
        debug!("d3d12 pipeline {index} created");
        Ok(PipelineHandle::new(index))
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        match self.pipelines.get(pipeline.index()) {
            Some(p) => unsafe {
                self.list.SetGraphicsRootSignature(&p.root_signature);
                self.list.SetPipelineState(&p.state);
                self.list.IASetPrimitiveTopology(p.topology);
            },
            None => warn!("bind of unknown pipeline {pipeline:?} ignored"),
        }
    }

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        unsafe {
            self.list.DrawInstanced(
                vertices.end.saturating_sub(vertices.start),
                instances.end.saturating_sub(instances.start),
                vertices.start,
                instances.start,
            );
        }
    }
}

impl Dx12Backend {
    fn gpu(&self) -> Result<&Gpu> {
        self.gpu.as_ref().context("d3d12 device already destroyed")
    }

    fn gpu_mut(&mut self) -> Result<&mut Gpu> {
        self.gpu.as_mut().context("d3d12 device already destroyed")
    }

    fn rtv_handle(&self, gpu: &Gpu, image: ImageIndex) -> D3D12_CPU_DESCRIPTOR_HANDLE {
        let start = unsafe { gpu.rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: start.ptr + image.index() * self.rtv_descriptor_size,
        }
    }

    unsafe fn signal_and_wait(&mut self) -> Result<()> {
        let value = self.next_fence_value;
        self.next_fence_value += 1;
        let gpu = self.gpu()?;
        gpu.queue.Signal(&gpu.fence, value).context("Signal")?;
        wait_for(&gpu.fence, self.fence_event, value)
    }
}

impl Backend for Dx12Backend {
    type Settings = Dx12Settings;

    const NAME: &'static str = "d3d12";

    fn create(
        window: &dyn HasWindowHandle,
        _display: &dyn HasDisplayHandle,
        size: RenderSize,
        frames_in_flight: usize,
        settings: &Dx12Settings,
    ) -> Result<Self> {
        let hwnd = match window
            .window_handle()
            .map_err(|e| anyhow!("window handle: {e}"))?
            .as_raw()
        {
            RawWindowHandle::Win32(h) => HWND(h.hwnd.get() as *mut c_void),
            other => bail!("D3D12 needs a Win32 window, got {other:?}"),
        };
        let frames = frames_in_flight.max(1);
        let buffer_count = frames.max(2) as u32;

        unsafe {
            let factory: IDXGIFactory4 =
                CreateDXGIFactory2(DXGI_CREATE_FACTORY_FLAGS(0)).context("CreateDXGIFactory2")?;
            let device = create_device(&factory)?;

            let queue: ID3D12CommandQueue = device
                .CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                    Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                    ..Default::default()
                })
                .context("CreateCommandQueue")?;

            let sc_desc = DXGI_SWAP_CHAIN_DESC1 {
                BufferCount: buffer_count,
                Width: size.width,
                Height: size.height,
                Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                ..Default::default()
            };
            let swap_chain: IDXGISwapChain3 = factory
                .CreateSwapChainForHwnd(&queue, hwnd, &sc_desc, None, None)
                .context("CreateSwapChainForHwnd")?
                .cast()
                .context("IDXGISwapChain3")?;
            factory
                .MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)
                .context("MakeWindowAssociation")?;

            let rtv_heap: ID3D12DescriptorHeap = device
                .CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    NumDescriptors: buffer_count,
                    Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                    ..Default::default()
                })
                .context("CreateDescriptorHeap(RTV)")?;
            let rtv_descriptor_size =
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) as usize;
            let heap_start = rtv_heap.GetCPUDescriptorHandleForHeapStart();
            let mut render_targets = Vec::with_capacity(buffer_count as usize);
            for i in 0..buffer_count {
                let rt: ID3D12Resource = swap_chain.GetBuffer(i).context("GetBuffer")?;
                let handle = D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: heap_start.ptr + i as usize * rtv_descriptor_size,
                };
                device.CreateRenderTargetView(&rt, None, handle);
                render_targets.push(rt);
            }

            let mut slots = Vec::with_capacity(frames);
            for _ in 0..frames {
                let allocator: ID3D12CommandAllocator = device
                    .CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT)
                    .context("CreateCommandAllocator")?;
                let list: ID3D12GraphicsCommandList = device
                    .CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &allocator, None)
                    .context("CreateCommandList")?;
                list.Close().context("ID3D12GraphicsCommandList::Close")?;
                slots.push(Slot {
                    allocator,
                    list,
                    fence_value: 0,
                    open: false,
                });
            }

            let fence: ID3D12Fence = device
                .CreateFence(0, D3D12_FENCE_FLAG_NONE)
                .context("CreateFence")?;
            let fence_event =
                CreateEventA(None, false, false, PCSTR::null()).context("CreateEventA")?;

            info!(
                "d3d12 swapchain: R8G8B8A8_UNORM, {}x{}, {buffer_count} buffers, vsync={}",
                size.width, size.height, settings.vsync
            );

            Ok(Dx12Backend {
                gpu: Some(Gpu {
                    pipelines: Vec::new(),
                    slots,
                    fence,
                    render_targets,
                    rtv_heap,
                    swap_chain,
                    queue,
                    device,
                    _factory: factory,
                }),
                fence_event,
                next_fence_value: 1,
                rtv_descriptor_size,
                extent: size,
                sync_interval: u32::from(settings.vsync),
            })
        }
    }

    fn frames_in_flight(&self) -> usize {
        self.gpu.as_ref().map_or(0, |g| g.slots.len())
    }

    fn image_count(&self) -> usize {
        self.gpu.as_ref().map_or(0, |g| g.render_targets.len())
    }

    fn extent(&self) -> RenderSize {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let gpu = self.gpu()?;
        let s = gpu
            .slots
            .get(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        unsafe { wait_for(&gpu.fence, self.fence_event, s.fence_value) }
    }

    fn acquire_image(&mut self, _slot: FrameSlot) -> Result<ImageIndex> {
        let gpu = self.gpu()?;
        Ok(ImageIndex(unsafe { gpu.swap_chain.GetCurrentBackBufferIndex() }))
    }

    fn reset_slot(&mut self, slot: FrameSlot) -> Result<()> {
        let s = self
            .gpu_mut()?
            .slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        unsafe {
            s.allocator.Reset().context("ID3D12CommandAllocator::Reset")?;
            s.list
                .Reset(&s.allocator, None)
                .context("ID3D12GraphicsCommandList::Reset")?;
        }
        s.open = true;
        Ok(())
    }

    fn record(
        &mut self,
        slot: FrameSlot,
        image: ImageIndex,
        clear: [f32; 4],
        draw: &mut dyn FnMut(&mut dyn PassEncoder),
    ) -> Result<()> {
        let extent = self.extent;
        let rtv = self.rtv_handle(self.gpu()?, image);
        let Gpu {
            pipelines,
            slots,
            render_targets,
            device,
            ..
        } = self.gpu_mut()?;
        let s = slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        let target = render_targets
            .get(image.index())
            .with_context(|| format!("no render target for image {}", image.0))?;
        let list = &s.list;

        unsafe {
            list.ResourceBarrier(&[transition_barrier(
                target,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )]);
            list.OMSetRenderTargets(1, Some(&rtv), false, None);
            list.ClearRenderTargetView(rtv, &clear, None);
            list.RSSetViewports(&[D3D12_VIEWPORT {
                TopLeftX: 0.0,
                TopLeftY: 0.0,
                Width: extent.width as f32,
                Height: extent.height as f32,
                MinDepth: D3D12_MIN_DEPTH,
                MaxDepth: D3D12_MAX_DEPTH,
            }]);
            list.RSSetScissorRects(&[RECT {
                left: 0,
                top: 0,
                right: extent.width as i32,
                bottom: extent.height as i32,
            }]);

            let mut pass = Dx12Pass {
                device,
                list,
                pipelines,
                extent,
            };
            draw(&mut pass);

            list.ResourceBarrier(&[transition_barrier(
                target,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            )]);
            list.Close().context("ID3D12GraphicsCommandList::Close")?;
        }
        s.open = false;
        Ok(())
    }

    fn submit(&mut self, slot: FrameSlot, _image: ImageIndex) -> Result<()> {
        let value = self.next_fence_value;
        let gpu = self.gpu_mut()?;
        let s = gpu
            .slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        unsafe {
            let list: ID3D12CommandList = s.list.cast().context("ID3D12CommandList")?;
            gpu.queue.ExecuteCommandLists(&[Some(list)]);
            gpu.queue.Signal(&gpu.fence, value).context("Signal")?;
        }
        s.fence_value = value;
        self.next_fence_value += 1;
        Ok(())
    }

    fn present(&mut self, _slot: FrameSlot, _image: ImageIndex) -> Result<()> {
        let gpu = self.gpu()?;
        unsafe {
            gpu.swap_chain
                .Present(self.sync_interval, DXGI_PRESENT(0))
                .ok()
                .context("IDXGISwapChain::Present")
        }
    }

    /// Nothing reached the queue; close a list left open by a failed record.
    fn discard(&mut self, slot: FrameSlot, image: ImageIndex) -> Result<()> {
        let s = self
            .gpu_mut()?
            .slots
            .get_mut(slot.index())
            .with_context(|| format!("{slot} out of range"))?;
        if s.open {
            unsafe {
                s.list
                    .Close()
                    .context("ID3D12GraphicsCommandList::Close(discard)")?;
            }
            s.open = false;
        }
        debug!("discarded back buffer {} on {slot}", image.0);
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.signal_and_wait() }
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.gpu.is_none() {
            return Ok(());
        }
        let idle = unsafe { self.signal_and_wait() };
        drop(self.gpu.take());
        if !self.fence_event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.fence_event);
            }
            self.fence_event = HANDLE::default();
        }
        info!("d3d12 backend destroyed");
        idle
    }
}

impl Drop for Dx12Backend {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("d3d12 teardown: {e:#}");
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! winit-backed platform, pumped from the game loop.

use crate::{Platform, PollStatus, WindowDesc};
use anyhow::{anyhow, bail, Context, Result};
use drakon_render::RenderSize;
use std::time::Duration;
use tracing::{debug, info};
use winit::{
    application::ApplicationHandler,
    dpi::{LogicalSize, PhysicalSize},
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    platform::pump_events::{EventLoopExtPumpEvents, PumpStatus},
    window::{Window, WindowAttributes, WindowId},
};

const CREATE_PUMPS: u32 = 64;

#[derive(Default)]
struct WinitState {
    pending: Option<WindowAttributes>,
    window: Option<Window>,
    create_error: Option<String>,
    close_requested: bool,
    size: PhysicalSize<u32>,
}

impl ApplicationHandler for WinitState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Some(attrs) = self.pending.take() else {
            return;
        };
        match event_loop.create_window(attrs) {
            Ok(window) => {
                self.size = window.inner_size();
                info!(
                    "window created: {}x{}",
                    self.size.width, self.size.height
                );
                self.window = Some(window);
            }
            Err(e) => self.create_error = Some(e.to_string()),
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::Resized(size) => {
                // The swapchain keeps its creation size.
                info!("Resized → {}x{}", size.width, size.height);
                self.size = size;
            }
            _ => {}
        }
    }
}

pub struct WinitPlatform {
    event_loop: EventLoop<()>,
    state: WinitState,
}

impl WinitPlatform {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new().context("EventLoop::new")?;
        Ok(WinitPlatform {
            event_loop,
            state: WinitState::default(),
        })
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        self.event_loop.pump_app_events(timeout, &mut self.state)
    }
}

impl Platform for WinitPlatform {
    type Window = Window;

    fn create_window(&mut self, desc: &WindowDesc) -> Result<()> {
        if self.state.window.is_some() {
            bail!("window already exists");
        }
        self.state.pending = Some(
            Window::default_attributes()
                .with_title(desc.title.clone())
                .with_inner_size(LogicalSize::new(desc.width, desc.height)),
        );

        // Windows are created from `resumed`, which arrives on an early pump.
        for _ in 0..CREATE_PUMPS {
            if let PumpStatus::Exit(code) = self.pump(Some(Duration::from_millis(5))) {
                bail!("event loop exited ({code}) before the window was created");
            }
            if let Some(e) = self.state.create_error.take() {
                self.state.pending = None;
                return Err(anyhow!("create_window: {e}"));
            }
            if self.state.window.is_some() {
                return Ok(());
            }
        }
        self.state.pending = None;
        bail!("no resume event after {CREATE_PUMPS} pumps")
    }

    fn window(&self) -> Option<&Window> {
        self.state.window.as_ref()
    }

    fn window_size(&self) -> Option<RenderSize> {
        self.state.window.as_ref().map(|_| RenderSize {
            width: self.state.size.width.max(1),
            height: self.state.size.height.max(1),
        })
    }

    fn poll_events(&mut self) -> PollStatus {
        if let PumpStatus::Exit(code) = self.pump(Some(Duration::ZERO)) {
            debug!("event loop exited with {code}");
            return PollStatus::Exit;
        }
        if self.state.close_requested {
            PollStatus::Exit
        } else {
            PollStatus::Continue
        }
    }

    fn destroy_window(&mut self) {
        if self.state.window.take().is_some() {
            info!("window destroyed");
        }
    }
}

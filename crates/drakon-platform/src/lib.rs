// SPDX-License-Identifier: CEPL-1.0
//! Window creation and event pumping behind [`Platform`].

pub mod desktop;
pub mod headless;

pub use desktop::WinitPlatform;
pub use headless::HeadlessPlatform;
pub use winit;

use drakon_render::RenderSize;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowDesc {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowDesc {
    fn default() -> Self {
        WindowDesc {
            title: "Drakon Game".to_owned(),
            width: 1280,
            height: 720,
        }
    }
}

impl WindowDesc {
    pub fn size(&self) -> RenderSize {
        RenderSize {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    Continue,
    /// The user closed the window or the event loop ended.
    Exit,
}

/// The OS window the renderer draws into.
///
/// The window must stay alive until the renderer using it has been cleaned
/// up; `destroy_window` is only called after that.
pub trait Platform {
    type Window: HasWindowHandle + HasDisplayHandle;

    fn create_window(&mut self, desc: &WindowDesc) -> anyhow::Result<()>;

    fn window(&self) -> Option<&Self::Window>;

    /// Current client area size, `None` before the window exists.
    fn window_size(&self) -> Option<RenderSize>;

    /// Drains pending events without blocking.
    fn poll_events(&mut self) -> PollStatus;

    fn destroy_window(&mut self);
}

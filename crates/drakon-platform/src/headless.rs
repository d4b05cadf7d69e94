// SPDX-License-Identifier: CEPL-1.0
//! Platform with no display, for the headless backend and tests.

use crate::{Platform, PollStatus, WindowDesc};
use anyhow::{bail, Result};
use drakon_render::{headless::NoSurface, RenderSize};
use tracing::info;

#[derive(Debug, Default)]
pub struct HeadlessPlatform {
    window: Option<NoSurface>,
    size: Option<RenderSize>,
    poll_limit: Option<u64>,
    polls: u64,
    close_requested: bool,
    fail_window: bool,
    destroyed: u32,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a close request on the poll after `limit` successful polls.
    pub fn with_poll_limit(mut self, limit: u64) -> Self {
        self.poll_limit = Some(limit);
        self
    }

    /// Makes `create_window` fail.
    pub fn failing(mut self) -> Self {
        self.fail_window = true;
        self
    }

    /// Simulates the user closing the window.
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// How many times an existing window was destroyed.
    pub fn destroyed(&self) -> u32 {
        self.destroyed
    }
}

impl Platform for HeadlessPlatform {
    type Window = NoSurface;

    fn create_window(&mut self, desc: &WindowDesc) -> Result<()> {
        if self.fail_window {
            bail!("headless window creation disabled");
        }
        if self.window.is_some() {
            bail!("window already exists");
        }
        self.window = Some(NoSurface);
        self.size = Some(desc.size());
        info!("headless window \"{}\" {}x{}", desc.title, desc.width, desc.height);
        Ok(())
    }

    fn window(&self) -> Option<&NoSurface> {
        self.window.as_ref()
    }

    fn window_size(&self) -> Option<RenderSize> {
        self.window.and(self.size)
    }

    fn poll_events(&mut self) -> PollStatus {
        if self.close_requested || self.poll_limit.is_some_and(|n| self.polls >= n) {
            return PollStatus::Exit;
        }
        self.polls += 1;
        PollStatus::Continue
    }

    fn destroy_window(&mut self) {
        if self.window.take().is_some() {
            self.size = None;
            self.destroyed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_limit_ends_the_loop() {
        let mut p = HeadlessPlatform::new().with_poll_limit(2);
        assert_eq!(p.poll_events(), PollStatus::Continue);
        assert_eq!(p.poll_events(), PollStatus::Continue);
        assert_eq!(p.poll_events(), PollStatus::Exit);
        assert_eq!(p.polls(), 2);
    }

    #[test]
    fn window_lifecycle() {
        let mut p = HeadlessPlatform::new();
        assert!(p.window().is_none());
        assert_eq!(p.window_size(), None);

        p.create_window(&WindowDesc::default()).unwrap();
        assert!(p.window().is_some());
        assert_eq!(
            p.window_size(),
            Some(RenderSize {
                width: 1280,
                height: 720
            })
        );
        assert!(p.create_window(&WindowDesc::default()).is_err());

        p.destroy_window();
        p.destroy_window();
        assert_eq!(p.destroyed(), 1);
        assert!(p.window().is_none());
    }

    #[test]
    fn failing_platform_has_no_window() {
        let mut p = HeadlessPlatform::new().failing();
        assert!(p.create_window(&WindowDesc::default()).is_err());
        assert!(p.window().is_none());
    }

    #[test]
    fn close_request_wins_over_limit() {
        let mut p = HeadlessPlatform::new().with_poll_limit(10);
        p.request_close();
        assert_eq!(p.poll_events(), PollStatus::Exit);
    }
}

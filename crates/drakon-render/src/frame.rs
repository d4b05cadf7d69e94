// SPDX-License-Identifier: CEPL-1.0
//! Frame-slot bookkeeping.
//!
//! A frame slot owns one command buffer, one "image available" signal, one
//! "render finished" signal and one fence. Slots rotate round-robin; the
//! swapchain image a frame renders into is chosen by the backend and tracked
//! separately as an [`ImageIndex`].

use std::fmt;

/// Number of frames the CPU may run ahead of the GPU by default.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameSlot(usize);

impl FrameSlot {
    pub const fn new(index: usize) -> Self {
        FrameSlot(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

/// Index of a presentable image, as returned by acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageIndex(pub u32);

impl ImageIndex {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Round-robin slot counter.
#[derive(Debug, Clone)]
pub struct FrameSlots {
    count: usize,
    current: usize,
}

impl FrameSlots {
    /// `count` is clamped to at least one.
    pub fn new(count: usize) -> Self {
        FrameSlots {
            count: count.max(1),
            current: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn current(&self) -> FrameSlot {
        FrameSlot(self.current)
    }

    pub fn advance(&mut self) -> FrameSlot {
        self.current = (self.current + 1) % self.count;
        FrameSlot(self.current)
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

impl Default for FrameSlots {
    fn default() -> Self {
        FrameSlots::new(DEFAULT_FRAMES_IN_FLIGHT)
    }
}

/// What a successful `render` call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    pub slot: FrameSlot,
    pub image: ImageIndex,
    /// Successful frames since `init`, starting at zero.
    pub frame_number: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStage {
    WaitFence,
    Acquire,
    Reset,
    Record,
    Submit,
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameStage::WaitFence => "wait-fence",
            FrameStage::Acquire => "acquire",
            FrameStage::Reset => "reset",
            FrameStage::Record => "record",
            FrameStage::Submit => "submit",
            FrameStage::Present => "present",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_cycle_modulo_count() {
        let mut slots = FrameSlots::new(2);
        let mut seen = vec![slots.current().index()];
        for _ in 0..4 {
            seen.push(slots.advance().index());
        }
        assert_eq!(seen, [0, 1, 0, 1, 0]);
    }

    #[test]
    fn zero_slots_clamps_to_one() {
        let mut slots = FrameSlots::new(0);
        assert_eq!(slots.count(), 1);
        assert_eq!(slots.advance(), FrameSlot::new(0));
    }

    #[test]
    fn reset_returns_to_first_slot() {
        let mut slots = FrameSlots::new(3);
        slots.advance();
        slots.advance();
        slots.reset();
        assert_eq!(slots.current().index(), 0);
    }

    #[test]
    fn stage_names() {
        assert_eq!(FrameStage::WaitFence.to_string(), "wait-fence");
        assert_eq!(FrameStage::Present.to_string(), "present");
    }
}

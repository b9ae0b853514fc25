// SPDX-License-Identifier: CEPL-1.0
use crate::{FrameError, FrameResult};

/// How the swapchain present mode is picked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentPolicy {
    /// MAILBOX, then IMMEDIATE, then FIFO.
    #[default]
    LowLatency,
    /// Always FIFO (refresh-locked).
    Vsync,
}

/// Immutable settings handed to the scheduler and the swapchain at
/// construction. Nothing in the frame path reads ambient state.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameConfig {
    pub frames_in_flight: usize,
    pub present_policy: PresentPolicy,
    pub clear_color: [f32; 4],
    /// Enables validation layers and the debug messenger where available.
    pub validation: bool,
}

impl FrameConfig {
    pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

    pub fn validate(&self) -> FrameResult<()> {
        if self.frames_in_flight == 0 {
            return Err(FrameError::setup(
                "frame config",
                "frames_in_flight must be at least 1",
            ));
        }
        Ok(())
    }

    pub fn with_frames_in_flight(mut self, n: usize) -> Self {
        self.frames_in_flight = n;
        self
    }

    pub fn with_present_policy(mut self, policy: PresentPolicy) -> Self {
        self.present_policy = policy;
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: Self::DEFAULT_FRAMES_IN_FLIGHT,
            present_policy: PresentPolicy::LowLatency,
            clear_color: [0.02, 0.02, 0.04, 1.0],
            validation: cfg!(debug_assertions),
        }
    }
}

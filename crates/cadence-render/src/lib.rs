// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame presentation core.
//!
//! [`FrameLoop`] ties a [`FrameScheduler`] (fixed pool of frame slots), a
//! [`RecreationController`] and a backend [`PresentTarget`] together behind a
//! single `draw_frame()` call. The Vulkan backend lives in `cadence-render-vk`.
#![deny(unsafe_op_in_unsafe_fn)]

mod config;
mod device;
mod error;
mod frame_loop;
mod outcome;
mod recreate;
mod scheduler;
mod signal;

pub use config::{FrameConfig, PresentPolicy};
pub use device::{FrameDevice, PresentTarget, SurfaceProbe, SwapchainSummary};
pub use error::{ContractViolation, FrameError, FrameResult};
pub use frame_loop::{FrameLoop, FrameStatus};
pub use outcome::{Acquire, PresentationOutcome};
pub use recreate::{RecreateReason, RecreateStatus, RecreationController, RecreationState};
pub use scheduler::{
    BeginFrame, FramePhase, FrameScheduler, FrameSlot, FrameTicket, SubmissionStats,
};
pub use signal::ResizeSignal;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area size, reported by minimized windows.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What the loop driver talks to. Implemented by [`FrameLoop`] and by backend
/// wrappers that own the native context around it.
pub trait Renderer {
    /// One acquire/submit/present cycle, or one recreation cycle.
    fn draw_frame(&mut self) -> FrameResult<FrameStatus>;

    /// Handle the windowing layer uses to flag a resize.
    fn resize_signal(&self) -> ResizeSignal;

    /// Current swapchain extent.
    fn extent(&self) -> RenderSize;

    fn notify_resized(&self) {
        self.resize_signal().notify();
    }
}

// SPDX-License-Identifier: CEPL-1.0
use tracing::{debug, info};

use crate::{FrameDevice, FrameResult, PresentTarget, SurfaceProbe, SwapchainSummary};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreationState {
    Active,
    /// Waiting for a non-zero surface, then for the device to go idle.
    Draining,
    Rebuilding,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateReason {
    /// Acquire or present reported `OutOfDate`.
    OutOfDate,
    /// Acquire or present reported `SubOptimal`.
    SubOptimal,
    /// The windowing layer raised the resize flag.
    Resized,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateStatus {
    /// The surface has zero area, either at the probe (and the platform
    /// cannot block here) or inside the rebuild itself. The controller stays
    /// in `Draining` until the next attempt.
    Deferred,
    Rebuilt(SwapchainSummary),
}

/// Rebuilds the surface-bound resources when the swapchain goes stale.
///
/// `Active → Draining → Rebuilding → Active`. A failure while rebuilding is
/// fatal and leaves the controller in `Rebuilding`.
#[derive(Debug)]
pub struct RecreationController {
    state: RecreationState,
    reason: Option<RecreateReason>,
    rebuilds: u64,
    last: Option<SwapchainSummary>,
}

impl Default for RecreationController {
    fn default() -> Self {
        Self::new()
    }
}

impl RecreationController {
    pub fn new() -> Self {
        Self {
            state: RecreationState::Active,
            reason: None,
            rebuilds: 0,
            last: None,
        }
    }

    pub fn state(&self) -> RecreationState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state != RecreationState::Active
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuilds
    }

    pub fn last_summary(&self) -> Option<SwapchainSummary> {
        self.last
    }

    pub fn request(&mut self, reason: RecreateReason) {
        if self.state == RecreationState::Active {
            debug!("swapchain recreation requested: {:?}", reason);
            self.state = RecreationState::Draining;
            self.reason = Some(reason);
        }
    }

    /// Runs (or resumes) a recreation. The caller must be between frame
    /// cycles.
    pub fn run<T, P>(
        &mut self,
        device: &T::Device,
        target: &mut T,
        probe: &mut P,
    ) -> FrameResult<RecreateStatus>
    where
        T: PresentTarget,
        P: SurfaceProbe,
    {
        if self.state == RecreationState::Active {
            self.request(RecreateReason::Resized);
        }

        // Minimized: not an error, just wait for a drawable surface.
        let size = loop {
            let size = probe.framebuffer_size();
            if !size.is_empty() {
                break size;
            }
            if !probe.wait_for_events() {
                debug!("surface has zero area; recreation deferred");
                return Ok(RecreateStatus::Deferred);
            }
        };

        // Nothing in flight may reference what is about to be destroyed.
        device.wait_idle()?;

        self.state = RecreationState::Rebuilding;
        let Some(summary) = target.rebuild(size)? else {
            debug!("surface shrank to zero area before rebuild; recreation deferred");
            self.state = RecreationState::Draining;
            return Ok(RecreateStatus::Deferred);
        };

        self.rebuilds += 1;
        self.last = Some(summary);
        self.state = RecreationState::Active;
        info!(
            "swapchain recreated ({:?}): {} images, {}",
            self.reason.take(),
            summary.image_count,
            summary.extent
        );
        Ok(RecreateStatus::Rebuilt(summary))
    }
}

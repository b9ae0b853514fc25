// SPDX-License-Identifier: CEPL-1.0
use tracing::{error, info};

use crate::{
    BeginFrame, ContractViolation, FrameConfig, FrameDevice, FrameResult, FrameScheduler,
    PresentTarget, PresentationOutcome, RecreateReason, RecreateStatus, RecreationController,
    RenderSize, Renderer, ResizeSignal, SurfaceProbe, SwapchainSummary,
};

/// What one `draw_frame()` call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented { image_index: u32, slot: usize },
    /// No frame this time; the swapchain was rebuilt instead.
    Recreated(SwapchainSummary),
    /// The surface has zero area; nothing was drawn.
    Paused,
}

/// One scheduler, one target, one recreation controller.
pub struct FrameLoop<T, P>
where
    T: PresentTarget,
    P: SurfaceProbe,
{
    scheduler: FrameScheduler<T::Device>,
    target: T,
    recreation: RecreationController,
    probe: P,
    resize: ResizeSignal,
    shut_down: bool,
}

impl<T, P> FrameLoop<T, P>
where
    T: PresentTarget,
    P: SurfaceProbe,
{
    pub fn new(device: T::Device, target: T, probe: P, config: &FrameConfig) -> FrameResult<Self> {
        let scheduler = FrameScheduler::new(device, config, target.image_count())?;
        let summary = target.summary();
        info!(
            "frame loop ready: {} frames in flight, {} images, {}",
            scheduler.frames_in_flight(),
            summary.image_count,
            summary.extent
        );
        Ok(Self {
            scheduler,
            target,
            recreation: RecreationController::new(),
            probe,
            resize: ResizeSignal::new(),
            shut_down: false,
        })
    }

    /// Shares an existing resize flag (e.g. one already handed to a window
    /// callback) instead of the loop's own.
    pub fn with_resize_signal(mut self, signal: ResizeSignal) -> Self {
        self.resize = signal;
        self
    }

    pub fn scheduler(&self) -> &FrameScheduler<T::Device> {
        &self.scheduler
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn recreation(&self) -> &RecreationController {
        &self.recreation
    }

    pub fn probe_mut(&mut self) -> &mut P {
        &mut self.probe
    }

    pub fn draw_frame(&mut self) -> FrameResult<FrameStatus> {
        if self.shut_down {
            return Err(ContractViolation::Destroyed.into());
        }
        if self.recreation.is_pending() {
            return self.recreate();
        }

        let ticket = match self.scheduler.begin_frame(&mut self.target)? {
            BeginFrame::Ready(ticket) => ticket,
            BeginFrame::Stale(_) => {
                self.recreation.request(RecreateReason::OutOfDate);
                return self.recreate();
            }
        };

        self.target.prepare_image(ticket.image_index)?;
        let command_buffer = self.target.command_buffer(ticket.image_index)?;
        self.scheduler.submit(command_buffer)?;
        let outcome = self.scheduler.present(&mut self.target)?;
        self.scheduler.end_frame()?;

        let resized = self.resize.take();
        let reason = if outcome == PresentationOutcome::OutOfDate {
            Some(RecreateReason::OutOfDate)
        } else if outcome == PresentationOutcome::SubOptimal
            || ticket.acquire_outcome == PresentationOutcome::SubOptimal
        {
            Some(RecreateReason::SubOptimal)
        } else if resized {
            Some(RecreateReason::Resized)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.recreation.request(reason);
            self.recreate()?;
        }

        Ok(FrameStatus::Presented {
            image_index: ticket.image_index,
            slot: ticket.slot,
        })
    }

    /// Drains the device, then tears down the target and the frame slots.
    /// Runs at most once; also invoked on drop.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.scheduler.device().wait_idle()?;
        self.target.destroy();
        self.scheduler.destroy()?;
        self.shut_down = true;
        info!("frame loop shut down");
        Ok(())
    }

    fn recreate(&mut self) -> FrameResult<FrameStatus> {
        let status =
            self.recreation
                .run(self.scheduler.device(), &mut self.target, &mut self.probe)?;
        match status {
            RecreateStatus::Deferred => Ok(FrameStatus::Paused),
            RecreateStatus::Rebuilt(summary) => {
                self.scheduler
                    .reset_image_tracking(summary.image_count as usize)?;
                // The rebuild already used the latest surface size.
                self.resize.take();
                Ok(FrameStatus::Recreated(summary))
            }
        }
    }
}

impl<T, P> Renderer for FrameLoop<T, P>
where
    T: PresentTarget,
    P: SurfaceProbe,
{
    fn draw_frame(&mut self) -> FrameResult<FrameStatus> {
        FrameLoop::draw_frame(self)
    }

    fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    fn extent(&self) -> RenderSize {
        self.target.summary().extent
    }
}

impl<T, P> Drop for FrameLoop<T, P>
where
    T: PresentTarget,
    P: SurfaceProbe,
{
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("frame loop shutdown failed: {e}");
        }
    }
}

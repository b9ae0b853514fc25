// SPDX-License-Identifier: CEPL-1.0
use tracing::{debug, error, trace, warn};

use crate::{
    Acquire, ContractViolation, FrameConfig, FrameDevice, FrameError, FrameResult,
    PresentTarget, PresentationOutcome,
};

/// Where the scheduler is inside one frame cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    /// Between cycles.
    Idle,
    WaitingForGpu,
    Acquiring,
    Submitting,
    Presenting,
}

/// Sync objects for one frame in flight. Created once, never recreated on
/// resize.
pub struct FrameSlot<D: FrameDevice> {
    pub image_acquired: D::Semaphore,
    pub render_finished: D::Semaphore,
    pub in_flight: D::Fence,
    /// A submission signaling `in_flight` has not been observed complete.
    unacknowledged: bool,
}

impl<D: FrameDevice> FrameSlot<D> {
    fn create(device: &D) -> FrameResult<Self> {
        let image_acquired = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_acquired);
                return Err(e);
            }
        };
        // Signaled, so the first wait on a fresh slot returns immediately.
        let in_flight = match device.create_fence(true) {
            Ok(f) => f,
            Err(e) => {
                device.destroy_semaphore(render_finished);
                device.destroy_semaphore(image_acquired);
                return Err(e);
            }
        };
        Ok(Self {
            image_acquired,
            render_finished,
            in_flight,
            unacknowledged: false,
        })
    }

    fn release(self, device: &D) {
        device.destroy_fence(self.in_flight);
        device.destroy_semaphore(self.render_finished);
        device.destroy_semaphore(self.image_acquired);
    }

    pub fn is_unacknowledged(&self) -> bool {
        self.unacknowledged
    }
}

/// The frame being built between `begin_frame` and `end_frame`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameTicket {
    pub slot: usize,
    pub image_index: u32,
    /// `Valid` or `SubOptimal`; the latter schedules a rebuild after present.
    pub acquire_outcome: PresentationOutcome,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BeginFrame {
    Ready(FrameTicket),
    /// No image; the swapchain must be rebuilt before another attempt.
    Stale(PresentationOutcome),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubmissionStats {
    pub submitted: u64,
    /// Submissions whose fence the host has seen signaled.
    pub acknowledged: u64,
}

impl SubmissionStats {
    pub fn pending(&self) -> u64 {
        self.submitted - self.acknowledged
    }
}

/// Owns the frame-slot pool and drives acquire → submit → present.
///
/// At most `frames_in_flight` submissions are ever unacknowledged: a slot's
/// fence is waited on before its semaphores are reused, and the fence is
/// reset only immediately before the submission that will signal it again.
pub struct FrameScheduler<D: FrameDevice> {
    device: D,
    slots: Vec<FrameSlot<D>>,
    current: usize,
    phase: FramePhase,
    ticket: Option<FrameTicket>,
    presented: bool,
    /// Swapchain image index -> slot whose fence guards the last work on it.
    image_owners: Vec<Option<usize>>,
    stats: SubmissionStats,
    destroyed: bool,
}

impl<D: FrameDevice> FrameScheduler<D> {
    pub fn new(device: D, config: &FrameConfig, image_count: usize) -> FrameResult<Self> {
        config.validate()?;
        let n = config.frames_in_flight;
        if image_count < n {
            warn!(
                "{} swapchain images for {} frames in flight; frames will serialize on image reuse",
                image_count, n
            );
        }

        let mut slots = Vec::with_capacity(n);
        for _ in 0..n {
            match FrameSlot::create(&device) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in slots.drain(..) {
                        slot.release(&device);
                    }
                    return Err(e);
                }
            }
        }
        debug!("frame scheduler ready: {} slots, {} images", n, image_count);

        Ok(Self {
            device,
            slots,
            current: 0,
            phase: FramePhase::Idle,
            ticket: None,
            presented: false,
            image_owners: vec![None; image_count],
            stats: SubmissionStats::default(),
            destroyed: false,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&FrameSlot<D>> {
        self.slots.get(index)
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn stats(&self) -> SubmissionStats {
        self.stats
    }

    pub fn pending_submissions(&self) -> usize {
        self.slots.iter().filter(|s| s.unacknowledged).count()
    }

    /// The slot whose fence guards the most recent work on `image_index`.
    pub fn image_owner(&self, image_index: u32) -> Option<usize> {
        self.image_owners
            .get(image_index as usize)
            .copied()
            .flatten()
    }

    /// Waits for this slot's previous submission, then acquires an image.
    ///
    /// On `OutOfDate` nothing is submitted and the fence stays signaled, so
    /// the retry after recreation does not block on it.
    pub fn begin_frame<T>(&mut self, target: &mut T) -> FrameResult<BeginFrame>
    where
        T: PresentTarget<Device = D>,
    {
        self.ensure_live()?;
        self.expect_phase("begin_frame", FramePhase::Idle)?;
        let slot = self.current;

        self.phase = FramePhase::WaitingForGpu;
        self.wait_slot(slot)?;

        self.phase = FramePhase::Acquiring;
        let acquired = target.acquire_next_image(self.slots[slot].image_acquired)?;
        match acquired {
            Acquire::Image { index, outcome } if outcome.is_usable() => {
                self.claim_image(index, slot)?;
                let ticket = FrameTicket {
                    slot,
                    image_index: index,
                    acquire_outcome: outcome,
                };
                trace!("slot {} acquired image {} ({:?})", slot, index, outcome);
                self.ticket = Some(ticket);
                self.presented = false;
                self.phase = FramePhase::Submitting;
                Ok(BeginFrame::Ready(ticket))
            }
            Acquire::Unavailable(PresentationOutcome::OutOfDate) => {
                debug!("acquire on slot {}: swapchain out of date", slot);
                self.phase = FramePhase::Idle;
                Ok(BeginFrame::Stale(PresentationOutcome::OutOfDate))
            }
            other => Err(FrameError::setup(
                "acquire_next_image",
                format!("presentation engine reported {:?}", other.outcome()),
            )),
        }
    }

    /// Submits the prerecorded buffer for the acquired image.
    pub fn submit(&mut self, command_buffer: D::CommandBuffer) -> FrameResult<()> {
        self.ensure_live()?;
        let slot = self.current;
        if self.slots[slot].unacknowledged {
            return Err(ContractViolation::DoubleSubmission { slot }.into());
        }
        self.expect_phase("submit", FramePhase::Submitting)?;

        let s = &self.slots[slot];
        self.device.reset_fence(s.in_flight)?;
        self.device
            .submit(command_buffer, s.image_acquired, s.render_finished, s.in_flight)?;

        self.slots[slot].unacknowledged = true;
        self.stats.submitted += 1;
        self.phase = FramePhase::Presenting;
        Ok(())
    }

    /// Presents the acquired image once rendering has finished on the GPU.
    pub fn present<T>(&mut self, target: &mut T) -> FrameResult<PresentationOutcome>
    where
        T: PresentTarget<Device = D>,
    {
        self.ensure_live()?;
        self.expect_phase("present", FramePhase::Presenting)?;
        let ticket = match self.ticket {
            Some(t) if !self.presented => t,
            _ => {
                return Err(ContractViolation::OutOfPhase {
                    op: "present",
                    phase: self.phase,
                }
                .into())
            }
        };

        let outcome =
            target.present(ticket.image_index, self.slots[ticket.slot].render_finished)?;
        self.presented = true;
        match outcome {
            PresentationOutcome::Fatal => Err(FrameError::setup(
                "queue_present",
                "presentation engine reported a fatal status",
            )),
            other => {
                if other != PresentationOutcome::Valid {
                    debug!("present of image {}: {:?}", ticket.image_index, other);
                }
                Ok(other)
            }
        }
    }

    /// Advances the slot cycle.
    pub fn end_frame(&mut self) -> FrameResult<()> {
        self.expect_phase("end_frame", FramePhase::Presenting)?;
        if !self.presented {
            return Err(ContractViolation::OutOfPhase {
                op: "end_frame",
                phase: self.phase,
            }
            .into());
        }
        self.ticket = None;
        self.presented = false;
        self.current = (self.current + 1) % self.slots.len();
        self.phase = FramePhase::Idle;
        Ok(())
    }

    /// Forgets image ownership after the swapchain was rebuilt. Only valid
    /// between cycles, after a device-idle barrier.
    pub fn reset_image_tracking(&mut self, image_count: usize) -> FrameResult<()> {
        self.expect_phase("reset_image_tracking", FramePhase::Idle)?;
        self.image_owners.clear();
        self.image_owners.resize(image_count, None);
        Ok(())
    }

    /// Drains the device and destroys the slot pool.
    pub fn destroy(&mut self) -> FrameResult<()> {
        if self.destroyed {
            return Ok(());
        }
        self.device.wait_idle()?;
        for slot in self.slots.drain(..) {
            slot.release(&self.device);
        }
        self.stats.acknowledged = self.stats.submitted;
        self.destroyed = true;
        debug!("frame slots destroyed");
        Ok(())
    }

    fn wait_slot(&mut self, slot: usize) -> FrameResult<()> {
        self.device.wait_for_fence(self.slots[slot].in_flight)?;
        if self.slots[slot].unacknowledged {
            self.slots[slot].unacknowledged = false;
            self.stats.acknowledged += 1;
        }
        Ok(())
    }

    fn claim_image(&mut self, index: u32, slot: usize) -> FrameResult<()> {
        let i = index as usize;
        if i >= self.image_owners.len() {
            self.image_owners.resize(i + 1, None);
        }
        if let Some(owner) = self.image_owners[i] {
            if owner != slot {
                trace!("image {} still guarded by slot {}; waiting", index, owner);
                self.wait_slot(owner)?;
            }
        }
        self.image_owners[i] = Some(slot);
        Ok(())
    }

    fn expect_phase(&self, op: &'static str, want: FramePhase) -> FrameResult<()> {
        if self.phase != want {
            return Err(ContractViolation::OutOfPhase {
                op,
                phase: self.phase,
            }
            .into());
        }
        Ok(())
    }

    fn ensure_live(&self) -> FrameResult<()> {
        if self.destroyed {
            return Err(ContractViolation::Destroyed.into());
        }
        Ok(())
    }
}

impl<D: FrameDevice> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.destroy() {
            error!("frame slots leaked: {e}");
        }
    }
}

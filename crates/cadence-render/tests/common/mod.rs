// SPDX-License-Identifier: CEPL-1.0
//! In-memory GPU used to drive the frame loop without a driver.
//!
//! Submitted work only completes when the host waits on its fence (or on the
//! whole device), which keeps as much work in flight as the scheduler allows.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use cadence_render::{
    Acquire, ContractViolation, FrameConfig, FrameDevice, FrameError, FrameLoop, FrameResult,
    PresentTarget, PresentationOutcome, RenderSize, SurfaceProbe, SwapchainSummary,
};

pub const FORMAT_BGRA8_UNORM: i32 = 44;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    WaitFence(u64),
    ResetFence(u64),
    Submit { image: u32, fence: u64 },
    Acquire(u32),
    AcquireOutOfDate,
    Present(u32),
    Prepare(u32),
    WaitIdle,
    ProbeSize(RenderSize),
    WaitEvents,
    Rebuild(RenderSize),
    /// The surface reported zero area from inside `rebuild`.
    RebuildSkipped,
    DestroyTarget,
    DestroyFence(u64),
    DestroySemaphore(u64),
}

#[derive(Clone, Copy, Debug)]
pub enum ScriptedAcquire {
    Image(u32),
    SubOptimal(u32),
    OutOfDate,
}

struct Pending {
    fence: u64,
    image: u32,
}

pub struct GpuState {
    next_handle: u64,
    fences: HashMap<u64, bool>,
    semaphores: HashSet<u64>,
    queue: VecDeque<Pending>,
    next_image: u32,

    pub events: Vec<Event>,
    /// Largest number of submitted-but-unfinished batches ever observed.
    pub max_in_flight: usize,
    /// Times a frame touched an image that unfinished work still used.
    pub image_conflicts: usize,

    pub acquire_script: VecDeque<ScriptedAcquire>,
    pub present_script: VecDeque<PresentationOutcome>,
    pub sizes: VecDeque<RenderSize>,
    pub probe_blocks: bool,
    pub fail_next_rebuild: bool,
    /// Rebuilds that find the surface at zero area, as when the window is
    /// minimized between the size query and swapchain creation.
    pub zero_area_rebuilds: u32,

    /// Surface image-count capabilities; `max_images == 0` means no limit.
    pub min_images: u32,
    pub max_images: u32,
    pub image_count: u32,
    pub extent: RenderSize,
    pub format: i32,
    pub target_destroyed: bool,
}

pub type Gpu = Rc<RefCell<GpuState>>;

pub fn gpu(image_count: u32) -> Gpu {
    Rc::new(RefCell::new(GpuState {
        next_handle: 1,
        fences: HashMap::new(),
        semaphores: HashSet::new(),
        queue: VecDeque::new(),
        next_image: 0,
        events: Vec::new(),
        max_in_flight: 0,
        image_conflicts: 0,
        acquire_script: VecDeque::new(),
        present_script: VecDeque::new(),
        sizes: VecDeque::from([RenderSize::new(1280, 720)]),
        probe_blocks: true,
        fail_next_rebuild: false,
        zero_area_rebuilds: 0,
        min_images: image_count.saturating_sub(1),
        max_images: 0,
        image_count,
        extent: RenderSize::new(1280, 720),
        format: FORMAT_BGRA8_UNORM,
        target_destroyed: false,
    }))
}

impl GpuState {
    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn live_fences(&self) -> usize {
        self.fences.len()
    }

    pub fn live_semaphores(&self) -> usize {
        self.semaphores.len()
    }

    pub fn submitted_images(&self) -> Vec<u32> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::Submit { image, .. } => Some(*image),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.iter().position(|e| e == event)
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }

    /// One more than the minimum, capped by the maximum when there is one.
    fn derived_image_count(&self) -> u32 {
        let wanted = self.min_images + 1;
        if self.max_images > 0 {
            wanted.min(self.max_images)
        } else {
            wanted
        }
    }

    fn summary(&self) -> SwapchainSummary {
        SwapchainSummary {
            image_count: self.image_count,
            extent: self.extent,
            format: self.format,
            color_space: 0,
            present_mode: 1,
        }
    }
}

#[derive(Clone)]
pub struct SimDevice {
    pub gpu: Gpu,
}

impl FrameDevice for SimDevice {
    type Semaphore = u64;
    type Fence = u64;
    type CommandBuffer = u32;

    fn create_semaphore(&self) -> FrameResult<u64> {
        let mut g = self.gpu.borrow_mut();
        let h = g.handle();
        g.semaphores.insert(h);
        Ok(h)
    }

    fn create_fence(&self, signaled: bool) -> FrameResult<u64> {
        let mut g = self.gpu.borrow_mut();
        let h = g.handle();
        g.fences.insert(h, signaled);
        Ok(h)
    }

    fn destroy_semaphore(&self, semaphore: u64) {
        let mut g = self.gpu.borrow_mut();
        g.semaphores.remove(&semaphore);
        g.events.push(Event::DestroySemaphore(semaphore));
    }

    fn destroy_fence(&self, fence: u64) {
        let mut g = self.gpu.borrow_mut();
        g.fences.remove(&fence);
        g.events.push(Event::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: u64) -> FrameResult<()> {
        let mut g = self.gpu.borrow_mut();
        g.events.push(Event::WaitFence(fence));
        while !g.fences.get(&fence).copied().unwrap_or(false) {
            let Some(done) = g.queue.pop_front() else {
                return Err(FrameError::setup(
                    "sim",
                    "waited on an unsignaled fence with no pending work",
                ));
            };
            g.fences.insert(done.fence, true);
        }
        Ok(())
    }

    fn reset_fence(&self, fence: u64) -> FrameResult<()> {
        let mut g = self.gpu.borrow_mut();
        if g.queue.iter().any(|p| p.fence == fence) {
            return Err(FrameError::setup("sim", "reset a fence still in use"));
        }
        g.fences.insert(fence, false);
        g.events.push(Event::ResetFence(fence));
        Ok(())
    }

    fn submit(&self, image: u32, _wait: u64, _signal: u64, fence: u64) -> FrameResult<()> {
        let mut g = self.gpu.borrow_mut();
        if g.fences.get(&fence).copied() != Some(false) {
            return Err(FrameError::setup("sim", "submitted with a signaled fence"));
        }
        if g.queue.iter().any(|p| p.image == image) {
            g.image_conflicts += 1;
        }
        g.queue.push_back(Pending { fence, image });
        g.max_in_flight = g.max_in_flight.max(g.queue.len());
        g.events.push(Event::Submit { image, fence });
        Ok(())
    }

    fn wait_idle(&self) -> FrameResult<()> {
        let mut g = self.gpu.borrow_mut();
        while let Some(done) = g.queue.pop_front() {
            g.fences.insert(done.fence, true);
        }
        g.events.push(Event::WaitIdle);
        Ok(())
    }
}

pub struct SimTarget {
    pub gpu: Gpu,
}

impl PresentTarget for SimTarget {
    type Device = SimDevice;

    fn acquire_next_image(&mut self, _signal: u64) -> FrameResult<Acquire> {
        let mut g = self.gpu.borrow_mut();
        let scripted = g.acquire_script.pop_front();
        let acquired = match scripted {
            Some(ScriptedAcquire::Image(i)) => Acquire::image(i, false),
            Some(ScriptedAcquire::SubOptimal(i)) => Acquire::image(i, true),
            Some(ScriptedAcquire::OutOfDate) => {
                g.events.push(Event::AcquireOutOfDate);
                return Ok(Acquire::Unavailable(PresentationOutcome::OutOfDate));
            }
            None => {
                let i = g.next_image % g.image_count;
                g.next_image += 1;
                Acquire::image(i, false)
            }
        };
        if let Acquire::Image { index, .. } = acquired {
            g.events.push(Event::Acquire(index));
        }
        Ok(acquired)
    }

    fn present(&mut self, image_index: u32, _wait: u64) -> FrameResult<PresentationOutcome> {
        let mut g = self.gpu.borrow_mut();
        g.events.push(Event::Present(image_index));
        Ok(g
            .present_script
            .pop_front()
            .unwrap_or(PresentationOutcome::Valid))
    }

    fn command_buffer(&self, image_index: u32) -> FrameResult<u32> {
        let g = self.gpu.borrow();
        if image_index >= g.image_count {
            return Err(ContractViolation::ImageIndexOutOfRange {
                index: image_index,
                count: g.image_count as usize,
            }
            .into());
        }
        Ok(image_index)
    }

    fn prepare_image(&mut self, image_index: u32) -> FrameResult<()> {
        let mut g = self.gpu.borrow_mut();
        if g.queue.iter().any(|p| p.image == image_index) {
            g.image_conflicts += 1;
        }
        g.events.push(Event::Prepare(image_index));
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.gpu.borrow().image_count as usize
    }

    fn summary(&self) -> SwapchainSummary {
        self.gpu.borrow().summary()
    }

    fn rebuild(&mut self, size: RenderSize) -> FrameResult<Option<SwapchainSummary>> {
        let mut g = self.gpu.borrow_mut();
        if !g.queue.is_empty() {
            return Err(FrameError::setup("sim", "rebuild with work in flight"));
        }
        if std::mem::take(&mut g.fail_next_rebuild) {
            return Err(FrameError::setup("create_swapchain", "out of device memory"));
        }
        if g.zero_area_rebuilds > 0 {
            g.zero_area_rebuilds -= 1;
            g.events.push(Event::RebuildSkipped);
            return Ok(None);
        }
        g.events.push(Event::Rebuild(size));
        g.extent = size;
        g.image_count = g.derived_image_count();
        g.next_image = 0;
        Ok(Some(g.summary()))
    }

    fn destroy(&mut self) {
        let mut g = self.gpu.borrow_mut();
        g.target_destroyed = true;
        g.events.push(Event::DestroyTarget);
    }
}

pub struct SimProbe {
    pub gpu: Gpu,
}

impl SurfaceProbe for SimProbe {
    fn framebuffer_size(&mut self) -> RenderSize {
        let mut g = self.gpu.borrow_mut();
        let size = if g.sizes.len() > 1 {
            g.sizes.pop_front().unwrap_or_default()
        } else {
            g.sizes.front().copied().unwrap_or_default()
        };
        g.events.push(Event::ProbeSize(size));
        size
    }

    fn wait_for_events(&mut self) -> bool {
        let mut g = self.gpu.borrow_mut();
        g.events.push(Event::WaitEvents);
        g.probe_blocks
    }
}

pub type SimLoop = FrameLoop<SimTarget, SimProbe>;

pub fn sim_loop(frames_in_flight: usize, image_count: u32) -> (SimLoop, Gpu) {
    let gpu = gpu(image_count);
    let config = FrameConfig::default().with_frames_in_flight(frames_in_flight);
    let frame_loop = FrameLoop::new(
        SimDevice { gpu: gpu.clone() },
        SimTarget { gpu: gpu.clone() },
        SimProbe { gpu: gpu.clone() },
        &config,
    )
    .expect("sim frame loop");
    (frame_loop, gpu)
}

pub fn init_logs() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// SPDX-License-Identifier: CEPL-1.0
use std::fmt::Debug;

use crate::{Acquire, FrameResult, PresentationOutcome, RenderSize};

/// Host-side view of the logical device: sync primitives, the graphics queue
/// and the device-idle barrier.
///
/// Semaphores order work on the GPU only and are never waited on by the host.
/// Fences are the only thing the host blocks on.
pub trait FrameDevice {
    type Semaphore: Copy + Debug;
    type Fence: Copy + Debug;
    type CommandBuffer: Copy + Debug;

    fn create_semaphore(&self) -> FrameResult<Self::Semaphore>;
    fn create_fence(&self, signaled: bool) -> FrameResult<Self::Fence>;
    fn destroy_semaphore(&self, semaphore: Self::Semaphore);
    fn destroy_fence(&self, fence: Self::Fence);

    /// Blocks without timeout until `fence` is signaled.
    fn wait_for_fence(&self, fence: Self::Fence) -> FrameResult<()>;
    fn reset_fence(&self, fence: Self::Fence) -> FrameResult<()>;

    /// Enqueues `command_buffer` on the graphics queue. Execution waits on
    /// `wait` at the color-attachment-output stage, then signals `signal`
    /// and `fence`.
    fn submit(
        &self,
        command_buffer: Self::CommandBuffer,
        wait: Self::Semaphore,
        signal: Self::Semaphore,
        fence: Self::Fence,
    ) -> FrameResult<()>;

    /// Blocks until every queue on the device is idle.
    fn wait_idle(&self) -> FrameResult<()>;
}

/// Attributes of the swapchain currently built. Format, color space and
/// present mode are the backend's raw enum values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainSummary {
    pub image_count: u32,
    pub extent: RenderSize,
    pub format: i32,
    pub color_space: i32,
    pub present_mode: i32,
}

/// The surface-bound half of the backend: swapchain, per-image resources and
/// their prerecorded command buffers.
pub trait PresentTarget {
    type Device: FrameDevice;

    /// Requests the next presentable image; `signal` is signaled once the
    /// presentation engine releases it.
    fn acquire_next_image(
        &mut self,
        signal: <Self::Device as FrameDevice>::Semaphore,
    ) -> FrameResult<Acquire>;

    /// Queues `image_index` for presentation after `wait` is signaled.
    fn present(
        &mut self,
        image_index: u32,
        wait: <Self::Device as FrameDevice>::Semaphore,
    ) -> FrameResult<PresentationOutcome>;

    /// The prerecorded command buffer for `image_index`.
    fn command_buffer(
        &self,
        image_index: u32,
    ) -> FrameResult<<Self::Device as FrameDevice>::CommandBuffer>;

    /// Writes per-frame dynamic data for `image_index`. Only called once no
    /// in-flight frame references that image.
    fn prepare_image(&mut self, image_index: u32) -> FrameResult<()>;

    fn image_count(&self) -> usize;

    fn summary(&self) -> SwapchainSummary;

    /// Tears down and rebuilds everything derived from the surface. The
    /// caller guarantees the device is idle.
    ///
    /// `Ok(None)` means the surface itself reports zero area (it can shrink
    /// after the probe answered). Nothing is touched in that case and the
    /// rebuild is retried later.
    fn rebuild(&mut self, size: RenderSize) -> FrameResult<Option<SwapchainSummary>>;

    /// Releases every resource. The caller guarantees the device is idle.
    fn destroy(&mut self);
}

/// Window-side queries needed while recreating.
pub trait SurfaceProbe {
    /// Current drawable size in pixels; zero area when minimized.
    fn framebuffer_size(&mut self) -> RenderSize;

    /// Blocks until the platform delivers more events. Returns `false` when
    /// the platform cannot block here; recreation is then deferred to the
    /// next `draw_frame()`.
    fn wait_for_events(&mut self) -> bool {
        false
    }
}

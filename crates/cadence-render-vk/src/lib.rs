// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend for the `cadence-render` frame loop.
//!
//! [`VkRenderer`] owns the instance/device context and a [`FrameLoop`] over a
//! [`VkPresenter`]. Everything surface-bound is torn down before the context.

mod context;
mod debug;
mod pipeline;
mod presenter;
mod recorder;
mod resources;
mod swapchain;
mod sync;
mod teardown;

use anyhow::Result;
use cadence_render::{
    ContractViolation, FrameConfig, FrameLoop, FrameResult, FrameStatus, RenderSize, Renderer,
    ResizeSignal, SurfaceProbe,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::error;

pub use context::{QueueFamilies, VkContext};
pub use pipeline::{ShaderSet, FRAGMENT_SHADER, VERTEX_SHADER};
pub use presenter::VkPresenter;
pub use recorder::{CommandRecorder, DrawInputs};
pub use resources::{CameraUbo, Vertex};
pub use swapchain::{
    choose_extent, choose_image_count, choose_present_mode, choose_surface_format,
    classify_acquire, classify_present, is_drawable, SwapchainManager, PREFERRED_FORMAT,
};
pub use sync::{VkFrameDevice, VkResultExt};
pub use teardown::TeardownList;

pub type VkFrameLoop<P> = FrameLoop<VkPresenter, P>;

pub struct VkRenderer<P: SurfaceProbe> {
    // STRICT: dropped (shut down) before `context`.
    frames: Option<VkFrameLoop<P>>,
    resize: ResizeSignal,
    context: VkContext,
}

impl<P: SurfaceProbe> VkRenderer<P> {
    pub fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        probe: P,
        size: RenderSize,
        config: &FrameConfig,
        shaders: ShaderSet,
    ) -> Result<Self> {
        config.validate()?;
        let context = unsafe { VkContext::new(window, display, config.validation)? };
        let presenter = unsafe { VkPresenter::new(&context, size, config, shaders)? };
        let device = presenter.frame_device();
        let resize = ResizeSignal::new();
        let frames =
            FrameLoop::new(device, presenter, probe, config)?.with_resize_signal(resize.clone());
        Ok(Self {
            frames: Some(frames),
            resize,
            context,
        })
    }

    pub fn frame_loop(&self) -> Option<&VkFrameLoop<P>> {
        self.frames.as_ref()
    }

    pub fn context(&self) -> &VkContext {
        &self.context
    }

    /// Drains the GPU and releases every frame and swapchain resource. The
    /// context itself goes on drop.
    pub fn shutdown(&mut self) -> FrameResult<()> {
        if let Some(mut frames) = self.frames.take() {
            frames.shutdown()?;
        }
        Ok(())
    }
}

impl<P: SurfaceProbe> Renderer for VkRenderer<P> {
    fn draw_frame(&mut self) -> FrameResult<FrameStatus> {
        match self.frames.as_mut() {
            Some(frames) => frames.draw_frame(),
            None => Err(ContractViolation::Destroyed.into()),
        }
    }

    fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    fn extent(&self) -> RenderSize {
        self.frames
            .as_ref()
            .map(|f| f.extent())
            .unwrap_or_default()
    }
}

impl<P: SurfaceProbe> Drop for VkRenderer<P> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("renderer shutdown failed: {e}");
        }
    }
}

// SPDX-License-Identifier: CEPL-1.0
use std::time::Instant;

use anyhow::Result;
use ash::vk;
use cadence_render::{
    Acquire, ContractViolation, FrameConfig, FrameResult, PresentTarget, PresentationOutcome,
    RenderSize, SwapchainSummary,
};
use tracing::info;

use crate::context::VkContext;
use crate::pipeline::{create_render_pass, GraphicsPipeline, ShaderSet};
use crate::recorder::{CommandRecorder, DrawInputs};
use crate::resources::{
    create_camera_set_layout, CameraUbo, FrameUniforms, Mesh, TRI_IDXS, TRI_VERTS,
};
use crate::swapchain::SwapchainManager;
use crate::sync::{VkFrameDevice, VkResultExt};

/// The surface-bound half of the Vulkan backend: swapchain generation,
/// render pass and pipeline, per-image uniforms and prerecorded commands.
pub struct VkPresenter {
    device: ash::Device,
    instance: ash::Instance,
    phys: vk::PhysicalDevice,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    swapchain: SwapchainManager,
    set_layout: vk::DescriptorSetLayout,
    render_pass: vk::RenderPass,
    render_pass_format: vk::Format,
    pipeline: GraphicsPipeline,
    shaders: ShaderSet,
    mesh: Mesh,
    uniforms: FrameUniforms,
    recorder: CommandRecorder,

    started: Instant,
    destroyed: bool,
}

impl VkPresenter {
    pub unsafe fn new(
        ctx: &VkContext,
        size: RenderSize,
        config: &FrameConfig,
        shaders: ShaderSet,
    ) -> Result<Self> {
        let mut swapchain = SwapchainManager::new(ctx, config.present_policy, size)?;
        let recorder =
            match CommandRecorder::new(&ctx.device, ctx.families.graphics, config.clear_color) {
                Ok(r) => r,
                Err(e) => {
                    swapchain.destroy();
                    return Err(e);
                }
            };

        // Handles start null; destroy() on a partially built presenter is legal.
        let mut presenter = Self {
            device: ctx.device.clone(),
            instance: ctx.instance.clone(),
            phys: ctx.phys,
            graphics_queue: ctx.graphics_queue,
            present_queue: ctx.present_queue,
            swapchain,
            set_layout: vk::DescriptorSetLayout::null(),
            render_pass: vk::RenderPass::null(),
            render_pass_format: vk::Format::UNDEFINED,
            pipeline: GraphicsPipeline::default(),
            shaders,
            mesh: Mesh::default(),
            uniforms: FrameUniforms::default(),
            recorder,
            started: Instant::now(),
            destroyed: false,
        };
        presenter.init()?;
        Ok(presenter)
    }

    /// A `VkFrameDevice` on the same logical device and graphics queue.
    pub fn frame_device(&self) -> VkFrameDevice {
        VkFrameDevice::new(self.device.clone(), self.graphics_queue)
    }

    unsafe fn init(&mut self) -> Result<()> {
        self.set_layout = create_camera_set_layout(&self.device)?;
        self.mesh = Mesh::upload(
            &self.instance,
            &self.device,
            self.phys,
            self.graphics_queue,
            self.recorder.pool(),
            TRI_VERTS,
            TRI_IDXS,
        )?;
        self.build_pass_and_pipeline()?;
        self.build_image_resources()
    }

    unsafe fn build_pass_and_pipeline(&mut self) -> Result<()> {
        let format = self.swapchain.format();
        self.render_pass = create_render_pass(&self.device, format, self.swapchain.depth_format())?;
        self.render_pass_format = format;
        self.pipeline =
            GraphicsPipeline::create(&self.device, self.render_pass, self.set_layout, &self.shaders)?;
        Ok(())
    }

    unsafe fn destroy_pass_and_pipeline(&mut self) {
        self.pipeline.destroy(&self.device);
        self.device.destroy_render_pass(self.render_pass, None);
        self.render_pass = vk::RenderPass::null();
        self.render_pass_format = vk::Format::UNDEFINED;
    }

    // STRICT ORDER (per swapchain generation):
    // framebuffers -> per-image uniforms -> command buffers -> recording
    unsafe fn build_image_resources(&mut self) -> Result<()> {
        let image_count = self.swapchain.image_count();
        self.swapchain.create_framebuffers(self.render_pass)?;

        self.uniforms.destroy(&self.device);
        self.uniforms = FrameUniforms::create(
            &self.instance,
            &self.device,
            self.phys,
            self.set_layout,
            image_count,
        )?;

        self.recorder.resize(image_count)?;
        self.recorder.record_all(&DrawInputs {
            render_pass: self.render_pass,
            framebuffers: self.swapchain.framebuffers(),
            extent: self.swapchain.extent(),
            pipeline: &self.pipeline,
            mesh: &self.mesh,
            descriptor_sets: self.uniforms.sets(),
        })
    }

    /// Everything this presenter created, in reverse creation order. The
    /// device must be idle. Runs at most once.
    pub unsafe fn destroy_all(&mut self) {
        if self.destroyed {
            return;
        }
        self.recorder.destroy();
        self.uniforms.destroy(&self.device);
        // Framebuffers live in the swapchain generation and must go before
        // the render pass they were created against.
        self.swapchain.destroy();
        self.destroy_pass_and_pipeline();
        self.mesh.destroy(&self.device);
        self.device
            .destroy_descriptor_set_layout(self.set_layout, None);
        self.set_layout = vk::DescriptorSetLayout::null();
        self.destroyed = true;
        info!("presenter resources destroyed");
    }
}

impl PresentTarget for VkPresenter {
    type Device = VkFrameDevice;

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> FrameResult<Acquire> {
        unsafe { self.swapchain.acquire(signal) }
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> FrameResult<PresentationOutcome> {
        Ok(unsafe {
            self.swapchain
                .present(self.present_queue, image_index, wait)
        })
    }

    fn command_buffer(&self, image_index: u32) -> FrameResult<vk::CommandBuffer> {
        self.recorder.buffer(image_index as usize).ok_or_else(|| {
            ContractViolation::ImageIndexOutOfRange {
                index: image_index,
                count: self.recorder.len(),
            }
            .into()
        })
    }

    fn prepare_image(&mut self, image_index: u32) -> FrameResult<()> {
        let extent = self.swapchain.extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let ubo = CameraUbo::spinning(self.started.elapsed().as_secs_f32(), aspect);
        unsafe {
            self.uniforms
                .write(&self.device, image_index as usize, &ubo)
        }
        .setup("camera uniform write")
    }

    fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn summary(&self) -> SwapchainSummary {
        self.swapchain.summary()
    }

    fn rebuild(&mut self, size: RenderSize) -> FrameResult<Option<SwapchainSummary>> {
        unsafe {
            if !self.swapchain.rebuild(size).setup("swapchain rebuild")? {
                return Ok(None);
            }
            if self.swapchain.format() != self.render_pass_format {
                info!("surface format changed; rebuilding render pass and pipeline");
                self.destroy_pass_and_pipeline();
                self.build_pass_and_pipeline()
                    .setup("render pass rebuild")?;
            }
            self.build_image_resources()
                .setup("swapchain image resources")?;
        }
        Ok(Some(self.swapchain.summary()))
    }

    fn destroy(&mut self) {
        unsafe { self.destroy_all() }
    }
}

impl Drop for VkPresenter {
    fn drop(&mut self) {
        unsafe { self.destroy_all() }
    }
}

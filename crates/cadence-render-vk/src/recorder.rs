// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use tracing::debug;

use crate::pipeline::GraphicsPipeline;
use crate::resources::Mesh;

/// Everything a prerecorded frame references. Recorded buffers are only
/// valid while all of these stay alive.
pub struct DrawInputs<'a> {
    pub render_pass: vk::RenderPass,
    pub framebuffers: &'a [vk::Framebuffer],
    pub extent: vk::Extent2D,
    pub pipeline: &'a GraphicsPipeline,
    pub mesh: &'a Mesh,
    pub descriptor_sets: &'a [vk::DescriptorSet],
}

/// One primary command buffer per swapchain image, recorded once after each
/// (re)build and replayed every frame.
pub struct CommandRecorder {
    device: ash::Device,
    pool: vk::CommandPool,
    buffers: Vec<vk::CommandBuffer>,
    clear: [f32; 4],
}

impl CommandRecorder {
    pub unsafe fn new(device: &ash::Device, queue_family: u32, clear: [f32; 4]) -> Result<Self> {
        let pool_ci = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            queue_family_index: queue_family,
            ..Default::default()
        };
        let pool = device
            .create_command_pool(&pool_ci, None)
            .context("create_command_pool")?;
        Ok(Self {
            device: device.clone(),
            pool,
            buffers: Vec::new(),
            clear,
        })
    }

    pub fn pool(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn buffer(&self, image_index: usize) -> Option<vk::CommandBuffer> {
        self.buffers.get(image_index).copied()
    }

    /// Frees the current buffers and allocates `count` fresh ones. None of
    /// the old buffers may still be pending on the GPU.
    pub unsafe fn resize(&mut self, count: usize) -> Result<()> {
        self.free();
        if count == 0 {
            return Ok(());
        }
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count as u32,
            ..Default::default()
        };
        self.buffers = self
            .device
            .allocate_command_buffers(&ai)
            .context("allocate_command_buffers")?;
        Ok(())
    }

    pub unsafe fn record_all(&self, inputs: &DrawInputs<'_>) -> Result<()> {
        let n = self.buffers.len();
        if inputs.framebuffers.len() != n || inputs.descriptor_sets.len() != n {
            return Err(anyhow!(
                "record_all: {} command buffers, {} framebuffers, {} descriptor sets",
                n,
                inputs.framebuffers.len(),
                inputs.descriptor_sets.len()
            ));
        }
        if inputs.pipeline.pipeline == vk::Pipeline::null() {
            return Err(anyhow!("pipeline is VK_NULL_HANDLE at record time"));
        }
        for (i, &cmd) in self.buffers.iter().enumerate() {
            self.record_one(cmd, i, inputs)
                .with_context(|| format!("record command buffer {i}"))?;
        }
        debug!(
            "recorded {} command buffers at {}x{}",
            n, inputs.extent.width, inputs.extent.height
        );
        Ok(())
    }

    // STRICT ORDER (per image):
    // begin render pass (clears) -> pipeline -> viewport/scissor ->
    // vertex/index buffers -> descriptor set -> draw -> end render pass
    unsafe fn record_one(
        &self,
        cmd: vk::CommandBuffer,
        image_index: usize,
        inputs: &DrawInputs<'_>,
    ) -> Result<()> {
        let d = &self.device;
        d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            ..Default::default()
        };
        d.begin_command_buffer(cmd, &begin)?;

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: inputs.extent,
        };
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: inputs.render_pass,
            framebuffer: inputs.framebuffers[image_index],
            render_area: area,
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

        d.cmd_bind_pipeline(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            inputs.pipeline.pipeline,
        );

        // Negative height flips Y so +Y points up in clip space.
        let vp = vk::Viewport {
            x: 0.0,
            y: inputs.extent.height as f32,
            width: inputs.extent.width as f32,
            height: -(inputs.extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        };
        d.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
        d.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));

        let offsets = [0_u64];
        d.cmd_bind_vertex_buffers(cmd, 0, std::slice::from_ref(&inputs.mesh.vbuf), &offsets);
        d.cmd_bind_index_buffer(cmd, inputs.mesh.ibuf, 0, vk::IndexType::UINT32);

        d.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            inputs.pipeline.layout,
            0,
            std::slice::from_ref(&inputs.descriptor_sets[image_index]),
            &[],
        );

        d.cmd_draw_indexed(cmd, inputs.mesh.index_count, 1, 0, 0, 0);
        d.cmd_end_render_pass(cmd);
        d.end_command_buffer(cmd)?;
        Ok(())
    }

    unsafe fn free(&mut self) {
        if !self.buffers.is_empty() {
            self.device.free_command_buffers(self.pool, &self.buffers);
            self.buffers.clear();
        }
    }

    /// Buffers go with the pool. Safe to call twice.
    pub unsafe fn destroy(&mut self) {
        self.buffers.clear();
        if self.pool != vk::CommandPool::null() {
            self.device.destroy_command_pool(self.pool, None);
            self.pool = vk::CommandPool::null();
        }
    }
}

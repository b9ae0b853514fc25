// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use cadence_render::{FrameDevice, FrameError, FrameResult};

/// Maps backend failures onto the frame loop's fatal setup error.
pub trait VkResultExt<T> {
    fn setup(self, context: &'static str) -> FrameResult<T>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn setup(self, context: &'static str) -> FrameResult<T> {
        self.map_err(|e| FrameError::setup(context, format!("{e:?}")))
    }
}

impl<T> VkResultExt<T> for anyhow::Result<T> {
    fn setup(self, context: &'static str) -> FrameResult<T> {
        self.map_err(|e| FrameError::setup(context, format!("{e:#}")))
    }
}

/// Semaphores, fences and the graphics queue of one logical device.
#[derive(Clone)]
pub struct VkFrameDevice {
    device: ash::Device,
    queue: vk::Queue,
}

impl VkFrameDevice {
    pub fn new(device: ash::Device, graphics_queue: vk::Queue) -> Self {
        Self {
            device,
            queue: graphics_queue,
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }
}

impl FrameDevice for VkFrameDevice {
    type Semaphore = vk::Semaphore;
    type Fence = vk::Fence;
    type CommandBuffer = vk::CommandBuffer;

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&ci, None) }.setup("create_semaphore")
    }

    fn create_fence(&self, signaled: bool) -> FrameResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.setup("create_fence")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) };
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) };
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> FrameResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }.setup("wait_for_fences")
    }

    fn reset_fence(&self, fence: vk::Fence) -> FrameResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.setup("reset_fences")
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> FrameResult<()> {
        // Only the color writes have to wait for the presentation engine.
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.queue, std::slice::from_ref(&submit), fence)
        }
        .setup("queue_submit")
    }

    fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle() }.setup("device_wait_idle")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vk_errors_become_setup_errors() {
        let err = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .setup("queue_submit")
            .expect_err("device lost");
        match err {
            FrameError::Setup { context, detail } => {
                assert_eq!(context, "queue_submit");
                assert!(detail.contains("DEVICE_LOST"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn anyhow_chain_is_kept() {
        use anyhow::Context;
        let err = Err::<(), _>(anyhow::anyhow!("no memory type"))
            .context("create depth image")
            .setup("swapchain rebuild")
            .expect_err("chain");
        assert!(err.to_string().contains("create depth image: no memory type"));
    }
}

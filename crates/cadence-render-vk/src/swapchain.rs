// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::vk;
use cadence_render::{
    Acquire, FrameError, FrameResult, PresentPolicy, PresentationOutcome, RenderSize,
    SwapchainSummary,
};
use tracing::{debug, error, info};

use crate::context::{QueueFamilies, VkContext};
use crate::resources::find_memory_type;
use crate::teardown::TeardownList;

pub const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Preferred pair if offered, the preferred pair outright if the surface has
/// no preference, else whatever the driver lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    match formats {
        [] => None,
        [only] if only.format == vk::Format::UNDEFINED => Some(PREFERRED_FORMAT),
        _ => Some(
            formats
                .iter()
                .copied()
                .find(|f| {
                    f.format == PREFERRED_FORMAT.format
                        && f.color_space == PREFERRED_FORMAT.color_space
                })
                .unwrap_or(formats[0]),
        ),
    }
}

pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    policy: PresentPolicy,
) -> Option<vk::PresentModeKHR> {
    if modes.is_empty() {
        return None;
    }
    let order: &[vk::PresentModeKHR] = match policy {
        PresentPolicy::LowLatency => &[
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::FIFO,
        ],
        PresentPolicy::Vsync => &[vk::PresentModeKHR::FIFO],
    };
    // FIFO is the one mode every surface must support.
    Some(
        order
            .iter()
            .copied()
            .find(|m| modes.contains(m))
            .unwrap_or(vk::PresentModeKHR::FIFO),
    )
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
/// Minimized windows report a zero current extent; no swapchain can be made
/// for it until the window comes back.
pub fn is_drawable(extent: vk::Extent2D) -> bool {
    extent.width > 0 && extent.height > 0
}

pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    if caps.max_image_count == 0 {
        caps.min_image_count + 1
    } else {
        (caps.min_image_count + 1).min(caps.max_image_count)
    }
}

pub fn classify_acquire(result: Result<(u32, bool), vk::Result>) -> FrameResult<Acquire> {
    match result {
        Ok((index, suboptimal)) => Ok(Acquire::image(index, suboptimal)),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
            Ok(Acquire::Unavailable(PresentationOutcome::OutOfDate))
        }
        Err(e) => Err(FrameError::setup("acquire_next_image", format!("{e:?}"))),
    }
}

pub fn classify_present(result: Result<bool, vk::Result>) -> PresentationOutcome {
    match result {
        Ok(false) => PresentationOutcome::Valid,
        Ok(true) => PresentationOutcome::SubOptimal,
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentationOutcome::OutOfDate,
        Err(e) => {
            error!("queue_present failed: {e:?}");
            PresentationOutcome::Fatal
        }
    }
}

fn format_name(f: vk::Format) -> &'static str {
    match f {
        vk::Format::B8G8R8A8_UNORM => "B8G8R8A8_UNORM",
        vk::Format::B8G8R8A8_SRGB => "B8G8R8A8_SRGB",
        vk::Format::R8G8B8A8_UNORM => "R8G8B8A8_UNORM",
        vk::Format::R8G8B8A8_SRGB => "R8G8B8A8_SRGB",
        vk::Format::D32_SFLOAT => "D32_SFLOAT",
        vk::Format::D32_SFLOAT_S8_UINT => "D32_SFLOAT_S8_UINT",
        vk::Format::D24_UNORM_S8_UINT => "D24_UNORM_S8_UINT",
        _ => "OTHER",
    }
}

fn present_mode_name(m: vk::PresentModeKHR) -> &'static str {
    match m {
        vk::PresentModeKHR::FIFO => "FIFO",
        vk::PresentModeKHR::MAILBOX => "MAILBOX",
        vk::PresentModeKHR::IMMEDIATE => "IMMEDIATE",
        vk::PresentModeKHR::FIFO_RELAXED => "FIFO_RELAXED",
        _ => "OTHER",
    }
}

unsafe fn pick_depth_format(
    instance: &ash::Instance,
    phys: vk::PhysicalDevice,
) -> Result<vk::Format> {
    DEPTH_CANDIDATES
        .into_iter()
        .find(|&fmt| {
            instance
                .get_physical_device_format_properties(phys, fmt)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or_else(|| anyhow!("no supported depth attachment format"))
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DepthAttachment {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

/// The swapchain and everything derived from its images: color views, the
/// depth attachment and one framebuffer per image.
///
/// Each build is one generation recorded in a [`TeardownList`]. A rebuild
/// hands the current handle to the driver as `old_swapchain`, then releases
/// the retired generation once the new swapchain exists.
pub struct SwapchainManager {
    device: ash::Device,
    instance: ash::Instance,
    surface_loader: surface::Instance,
    loader: swapchain::Device,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    families: QueueFamilies,
    policy: PresentPolicy,
    depth_format: vk::Format,

    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    depth: DepthAttachment,
    framebuffers: Vec<vk::Framebuffer>,
    generation: TeardownList,
}

impl SwapchainManager {
    pub unsafe fn new(ctx: &VkContext, policy: PresentPolicy, desired: RenderSize) -> Result<Self> {
        let depth_format = pick_depth_format(&ctx.instance, ctx.phys)?;
        let mut manager = Self {
            device: ctx.device.clone(),
            instance: ctx.instance.clone(),
            surface_loader: ctx.surface_loader.clone(),
            loader: swapchain::Device::new(&ctx.instance, &ctx.device),
            phys: ctx.phys,
            surface: ctx.surface,
            families: ctx.families,
            policy,
            depth_format,
            handle: vk::SwapchainKHR::null(),
            format: PREFERRED_FORMAT,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
            depth: DepthAttachment::default(),
            framebuffers: Vec::new(),
            generation: TeardownList::new(),
        };
        match manager.build(desired) {
            Ok(true) => Ok(manager),
            Ok(false) => {
                manager.destroy();
                Err(anyhow!("surface has zero area at startup"))
            }
            Err(e) => {
                manager.destroy();
                Err(e)
            }
        }
    }

    /// Rebuilds swapchain, views and depth attachment for `desired`.
    /// Framebuffers are created afterwards with [`Self::create_framebuffers`]
    /// once the render pass for the new format exists. The device must be
    /// idle.
    ///
    /// Returns `false` without touching the current generation when the
    /// surface reports zero area.
    pub unsafe fn rebuild(&mut self, desired: RenderSize) -> Result<bool> {
        self.build(desired)
    }

    // STRICT ORDER (build):
    // 1) Query caps/formats/modes, choose policy values
    // 2) Create NEW swapchain with the current one as old_swapchain
    // 3) Release the retired generation (framebuffers, depth, views, old handle)
    // 4) Views, then depth attachment for the NEW extent
    unsafe fn build(&mut self, desired: RenderSize) -> Result<bool> {
        let caps = self
            .surface_loader
            .get_physical_device_surface_capabilities(self.phys, self.surface)
            .context("get_physical_device_surface_capabilities")?;
        let formats = self
            .surface_loader
            .get_physical_device_surface_formats(self.phys, self.surface)
            .context("get_physical_device_surface_formats")?;
        let modes = self
            .surface_loader
            .get_physical_device_surface_present_modes(self.phys, self.surface)
            .context("get_physical_device_surface_present_modes")?;

        let format =
            choose_surface_format(&formats).ok_or_else(|| anyhow!("surface reports no formats"))?;
        let present_mode = choose_present_mode(&modes, self.policy)
            .ok_or_else(|| anyhow!("surface reports no present modes"))?;
        let extent = choose_extent(&caps, desired);
        if !is_drawable(extent) {
            debug!(
                "surface extent is {}x{}; swapchain left as is",
                extent.width, extent.height
            );
            return Ok(false);
        }
        let min_image_count = choose_image_count(&caps);

        let family_indices = [self.families.graphics, self.families.present];
        let (sharing_mode, family_count, p_families) = if self.families.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        } else {
            (vk::SharingMode::CONCURRENT, 2, family_indices.as_ptr())
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: p_families,
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: self.handle,
            ..Default::default()
        };
        let handle = self
            .loader
            .create_swapchain(&swap_info, None)
            .context("create_swapchain")?;

        let mut retired = std::mem::take(&mut self.generation);
        retired.flush(&self.device);
        self.views.clear();
        self.framebuffers.clear();
        self.depth = DepthAttachment::default();

        self.handle = handle;
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        let loader = self.loader.clone();
        self.generation.push("swapchain", move |_| unsafe {
            loader.destroy_swapchain(handle, None)
        });

        self.images = self
            .loader
            .get_swapchain_images(handle)
            .context("get_swapchain_images")?;
        for &image in &self.images {
            let view = create_view(
                &self.device,
                image,
                format.format,
                vk::ImageAspectFlags::COLOR,
            )
            .context("create swapchain image view")?;
            self.views.push(view);
            self.generation.push("image view", move |d| unsafe {
                d.destroy_image_view(view, None)
            });
        }

        self.create_depth().context("create depth attachment")?;

        info!(
            "swapchain: {} / {:?}, present_mode: {}, extent: {}x{}, images(min={} → got={})",
            format_name(format.format),
            format.color_space,
            present_mode_name(present_mode),
            extent.width,
            extent.height,
            min_image_count,
            self.images.len()
        );
        Ok(true)
    }

    unsafe fn create_depth(&mut self) -> Result<()> {
        let img_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format: self.depth_format,
            extent: vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = self.device.create_image(&img_ci, None)?;
        self.generation
            .push("depth image", move |d| unsafe { d.destroy_image(image, None) });

        let req = self.device.get_image_memory_requirements(image);
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                &self.instance,
                self.phys,
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        let memory = self.device.allocate_memory(&alloc, None)?;
        self.generation
            .push("depth memory", move |d| unsafe { d.free_memory(memory, None) });
        self.device.bind_image_memory(image, memory, 0)?;

        let view = create_view(
            &self.device,
            image,
            self.depth_format,
            vk::ImageAspectFlags::DEPTH,
        )?;
        self.generation
            .push("depth view", move |d| unsafe { d.destroy_image_view(view, None) });

        self.depth = DepthAttachment {
            image,
            memory,
            view,
        };
        Ok(())
    }

    /// One framebuffer per image: its color view plus the shared depth view.
    pub unsafe fn create_framebuffers(&mut self, render_pass: vk::RenderPass) -> Result<()> {
        if !self.framebuffers.is_empty() {
            return Err(anyhow!("framebuffers already exist for this swapchain"));
        }
        for &view in &self.views {
            let attachments = [view, self.depth.view];
            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: attachments.len() as u32,
                p_attachments: attachments.as_ptr(),
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let fb = self
                .device
                .create_framebuffer(&fb_info, None)
                .context("create_framebuffer")?;
            self.framebuffers.push(fb);
            self.generation
                .push("framebuffer", move |d| unsafe { d.destroy_framebuffer(fb, None) });
        }
        Ok(())
    }

    pub unsafe fn acquire(&self, signal: vk::Semaphore) -> FrameResult<Acquire> {
        classify_acquire(self.loader.acquire_next_image(
            self.handle,
            u64::MAX,
            signal,
            vk::Fence::null(),
        ))
    }

    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> PresentationOutcome {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &image_index,
            ..Default::default()
        };
        classify_present(self.loader.queue_present(queue, &present))
    }

    /// Framebuffers, depth attachment, views, swapchain. The device must be
    /// idle.
    pub unsafe fn destroy(&mut self) {
        self.generation.flush(&self.device);
        self.framebuffers.clear();
        self.views.clear();
        self.images.clear();
        self.depth = DepthAttachment::default();
        self.handle = vk::SwapchainKHR::null();
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn summary(&self) -> SwapchainSummary {
        SwapchainSummary {
            image_count: self.images.len() as u32,
            extent: RenderSize::new(self.extent.width, self.extent.height),
            format: self.format.format.as_raw(),
            color_space: self.format.color_space.as_raw(),
            present_mode: self.present_mode.as_raw(),
        }
    }
}

unsafe fn create_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> Result<vk::ImageView> {
    let sub = vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };
    let iv_info = vk::ImageViewCreateInfo {
        s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
        image,
        view_type: vk::ImageViewType::TYPE_2D,
        format,
        subresource_range: sub,
        ..Default::default()
    };
    Ok(device.create_image_view(&iv_info, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free_size_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        }
    }

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn free_size_surface_clamps_request() {
        let caps = free_size_caps();
        let e = choose_extent(&caps, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (1920, 1080));
        let e = choose_extent(&caps, RenderSize::new(8000, 8000));
        assert_eq!((e.width, e.height), (4096, 4096));
        let e = choose_extent(&caps, RenderSize::new(0, 50));
        assert_eq!((e.width, e.height), (1, 50));
    }

    #[test]
    fn defined_current_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..free_size_caps()
        };
        let e = choose_extent(&caps, RenderSize::new(1920, 1080));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn minimized_surface_is_not_drawable() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D::default(),
            ..free_size_caps()
        };
        let e = choose_extent(&caps, RenderSize::new(800, 600));
        assert_eq!((e.width, e.height), (0, 0));
        assert!(!is_drawable(e));
        assert!(is_drawable(choose_extent(&free_size_caps(), RenderSize::new(800, 600))));
    }

    #[test]
    fn low_latency_prefers_mailbox_then_immediate() {
        use vk::PresentModeKHR as M;
        let ll = PresentPolicy::LowLatency;
        assert_eq!(choose_present_mode(&[M::FIFO, M::MAILBOX], ll), Some(M::MAILBOX));
        assert_eq!(choose_present_mode(&[M::FIFO], ll), Some(M::FIFO));
        assert_eq!(
            choose_present_mode(&[M::FIFO, M::IMMEDIATE], ll),
            Some(M::IMMEDIATE)
        );
        assert_eq!(
            choose_present_mode(&[M::IMMEDIATE, M::MAILBOX, M::FIFO], ll),
            Some(M::MAILBOX)
        );
        assert_eq!(choose_present_mode(&[], ll), None);
    }

    #[test]
    fn vsync_always_picks_fifo() {
        use vk::PresentModeKHR as M;
        assert_eq!(
            choose_present_mode(&[M::MAILBOX, M::IMMEDIATE, M::FIFO], PresentPolicy::Vsync),
            Some(M::FIFO)
        );
    }

    #[test]
    fn preferred_format_wins_when_offered() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let f = choose_surface_format(&formats).expect("format");
        assert_eq!(f.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(f.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn undefined_format_means_no_preference() {
        let formats = [fmt(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)];
        let f = choose_surface_format(&formats).expect("format");
        assert_eq!(f.format, PREFERRED_FORMAT.format);
    }

    #[test]
    fn falls_back_to_first_reported_format() {
        let formats = [
            fmt(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let f = choose_surface_format(&formats).expect("format");
        assert_eq!(f.format, vk::Format::R8G8B8A8_SRGB);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut caps = free_size_caps();
        assert_eq!(choose_image_count(&caps), 3);
        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);
        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn acquire_and_present_statuses_are_classified() {
        assert_eq!(
            classify_acquire(Ok((1, false))).expect("image"),
            Acquire::image(1, false)
        );
        assert_eq!(
            classify_acquire(Ok((2, true))).expect("image").outcome(),
            PresentationOutcome::SubOptimal
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).expect("stale"),
            Acquire::Unavailable(PresentationOutcome::OutOfDate)
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());

        assert_eq!(classify_present(Ok(false)), PresentationOutcome::Valid);
        assert_eq!(classify_present(Ok(true)), PresentationOutcome::SubOptimal);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            PresentationOutcome::OutOfDate
        );
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)),
            PresentationOutcome::Fatal
        );
    }
}

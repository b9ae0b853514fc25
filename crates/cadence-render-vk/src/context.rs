// SPDX-License-Identifier: CEPL-1.0
use std::ffi::{c_char, CStr};

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{info, warn};

use crate::debug::{DebugMessenger, VALIDATION_LAYER};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Instance, surface and logical device. Everything surface- or frame-bound
/// is created from this and must be gone before it drops.
pub struct VkContext {
    _entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    debug: Option<DebugMessenger>,

    pub phys: vk::PhysicalDevice,
    pub device: ash::Device,
    pub families: QueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl VkContext {
    // STRICT ORDER:
    // 1) Instance (WSI extensions, optional validation)
    // 2) Surface from THIS instance
    // 3) Physical device + queue families checked AGAINST THIS SURFACE
    // 4) Logical device with the swapchain extension
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        validation: bool,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("load Vulkan loader")?;
        let (instance, validation) = create_instance(&entry, dh, validation)?;

        let debug = if validation {
            match DebugMessenger::new(&entry, &instance) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("debug messenger unavailable: {e:#}");
                    None
                }
            }
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = match ash_window::create_surface(&entry, &instance, dh, wh, None) {
            Ok(s) => s,
            Err(e) => {
                destroy_instance(&instance, debug.as_ref());
                return Err(anyhow!("ash_window::create_surface: {e:?}"));
            }
        };

        let picked = pick_device_and_queues(&instance, &surface_loader, surface)
            .and_then(|(phys, families)| {
                create_device(&instance, phys, families).map(|device| (phys, families, device))
            });
        let (phys, families, device) = match picked {
            Ok(p) => p,
            Err(e) => {
                surface_loader.destroy_surface(surface, None);
                destroy_instance(&instance, debug.as_ref());
                return Err(e);
            }
        };

        let graphics_queue = device.get_device_queue(families.graphics, 0);
        let present_queue = device.get_device_queue(families.present, 0);

        let props = instance.get_physical_device_properties(phys);
        info!(
            "Vulkan device: {} (graphics family {}, present family {}, validation {})",
            props
                .device_name_as_c_str()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            families.graphics,
            families.present,
            validation
        );

        Ok(Self {
            _entry: entry,
            instance,
            surface_loader,
            surface,
            debug,
            phys,
            device,
            families,
            graphics_queue,
            present_queue,
        })
    }
}

// STRICT TEARDOWN ORDER: device, then debug messenger and surface, instance last.
impl Drop for VkContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            destroy_instance(&self.instance, self.debug.as_ref());
        }
        info!("Vulkan context destroyed");
    }
}

unsafe fn destroy_instance(instance: &Instance, debug: Option<&DebugMessenger>) {
    if let Some(m) = debug {
        m.destroy();
    }
    instance.destroy_instance(None);
}

unsafe fn has_extension(props: &[vk::ExtensionProperties], name: &CStr) -> bool {
    props
        .iter()
        .any(|e| CStr::from_ptr(e.extension_name.as_ptr()) == name)
}

/// Returns the instance and whether validation with a debug messenger could be
/// enabled.
unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    want_validation: bool,
) -> Result<(Instance, bool)> {
    let app_name = c"cadence";
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: app_name.as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let validation = want_validation && {
        let layers = entry
            .enumerate_instance_layer_properties()
            .unwrap_or_default();
        let found = layers
            .iter()
            .any(|l| CStr::from_ptr(l.layer_name.as_ptr()) == VALIDATION_LAYER);
        if !found {
            warn!("validation requested but {:?} is not installed", VALIDATION_LAYER);
        }
        found
    };
    let validation = validation && {
        let available = entry
            .enumerate_instance_extension_properties(None)
            .unwrap_or_default();
        has_extension(&available, ash::ext::debug_utils::NAME)
    };
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    let instance = entry
        .create_instance(&create_info, None)
        .context("create_instance")?;
    Ok((instance, validation))
}

/// First device with graphics + present support, the swapchain extension and
/// at least one surface format and present mode. Discrete GPUs win ties.
unsafe fn pick_device_and_queues(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let mut fallback = None;
    for phys in instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?
    {
        let Some(families) = find_queue_families(instance, surface_loader, surface, phys) else {
            continue;
        };

        let exts = instance
            .enumerate_device_extension_properties(phys)
            .unwrap_or_default();
        if !has_extension(&exts, swapchain::NAME) {
            continue;
        }

        let formats = surface_loader
            .get_physical_device_surface_formats(phys, surface)
            .unwrap_or_default();
        let modes = surface_loader
            .get_physical_device_surface_present_modes(phys, surface)
            .unwrap_or_default();
        if formats.is_empty() || modes.is_empty() {
            continue;
        }

        let props = instance.get_physical_device_properties(phys);
        if props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            return Ok((phys, families));
        }
        fallback.get_or_insert((phys, families));
    }
    fallback.ok_or_else(|| anyhow!("no physical device can render and present to this surface"))
}

unsafe fn find_queue_families(
    instance: &Instance,
    surface_loader: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let mut graphics = None;
    let mut present = None;
    for (i, q) in qprops.iter().enumerate() {
        let i = i as u32;
        let can_draw = q.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let can_present = surface_loader
            .get_physical_device_surface_support(phys, i, surface)
            .unwrap_or(false);
        // One family doing both is the common case and avoids concurrent sharing.
        if can_draw && can_present {
            return Some(QueueFamilies {
                graphics: i,
                present: i,
            });
        }
        if can_draw && graphics.is_none() {
            graphics = Some(i);
        }
        if can_present && present.is_none() {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|family| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index: family,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = [swapchain::NAME.as_ptr()];
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .context("create_device")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_family_is_listed_once() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert!(shared.is_shared());
        assert_eq!(shared.unique(), vec![0]);

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert!(!split.is_shared());
        assert_eq!(split.unique(), vec![0, 2]);
    }
}

// SPDX-License-Identifier: CEPL-1.0
//! Physical device selection and logical device creation.

use anyhow::{anyhow, Context, Result};
use ash::khr::{surface, swapchain};
use ash::{vk, Instance};
use std::ffi::CStr;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilies {
    pub fn shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

pub(crate) struct Queues {
    pub graphics: vk::Queue,
    pub present: vk::Queue,
}

unsafe fn find_families(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> Option<QueueFamilies> {
    let qprops = instance.get_physical_device_queue_family_properties(phys);
    let mut graphics = None;
    let mut present = None;
    for (i, q) in qprops.iter().enumerate() {
        let i = i as u32;
        if graphics.is_none() && q.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            graphics = Some(i);
        }
        if present.is_none()
            && surf_i
                .get_physical_device_surface_support(phys, i, surface)
                .unwrap_or(false)
        {
            present = Some(i);
        }
    }
    Some(QueueFamilies {
        graphics: graphics?,
        present: present?,
    })
}

unsafe fn has_swapchain_ext(instance: &Instance, phys: vk::PhysicalDevice) -> bool {
    instance
        .enumerate_device_extension_properties(phys)
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == swapchain::NAME))
}

unsafe fn surface_usable(
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
) -> bool {
    let formats = surf_i
        .get_physical_device_surface_formats(phys, surface)
        .unwrap_or_default();
    let modes = surf_i
        .get_physical_device_surface_present_modes(phys, surface)
        .unwrap_or_default();
    !formats.is_empty() && !modes.is_empty()
}

/// First device with graphics and present families, `VK_KHR_swapchain`, and
/// at least one surface format and present mode.
pub(crate) unsafe fn pick_physical_device(
    instance: &Instance,
    surf_i: &surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<(vk::PhysicalDevice, QueueFamilies)> {
    let devices = instance
        .enumerate_physical_devices()
        .context("enumerate_physical_devices")?;
    for phys in devices {
        let props = instance.get_physical_device_properties(phys);
        let name = props
            .device_name_as_c_str()
            .map(CStr::to_string_lossy)
            .unwrap_or_default();
        let Some(families) = find_families(instance, surf_i, surface, phys) else {
            debug!("skipping {name}: missing graphics or present queue");
            continue;
        };
        if !has_swapchain_ext(instance, phys) {
            debug!("skipping {name}: no VK_KHR_swapchain");
            continue;
        }
        if !surface_usable(surf_i, surface, phys) {
            debug!("skipping {name}: surface has no formats or present modes");
            continue;
        }
        info!(
            "vk device: {name} (graphics family {}, present family {})",
            families.graphics, families.present
        );
        return Ok((phys, families));
    }
    Err(anyhow!("no suitable physical device"))
}

pub(crate) unsafe fn create_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> Result<(ash::Device, Queues)> {
    let priorities = [1.0f32];
    let queue_infos: Vec<_> = families
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
    let extensions = [swapchain::NAME.as_ptr()];
    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };
    let device = instance
        .create_device(phys, &create_info, None)
        .context("create_device")?;
    let queues = Queues {
        graphics: device.get_device_queue(families.graphics, 0),
        present: device.get_device_queue(families.present, 0),
    };
    Ok((device, queues))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_families() {
        let shared = QueueFamilies {
            graphics: 0,
            present: 0,
        };
        assert!(shared.shared());
        assert_eq!(shared.unique(), [0]);

        let split = QueueFamilies {
            graphics: 0,
            present: 2,
        };
        assert!(!split.shared());
        assert_eq!(split.unique(), [0, 2]);
    }
}

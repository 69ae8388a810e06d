// Synchronization primitives
//
// One binary semaphore, reused every frame: signaled by the acquire and
// waited on by the compute submission. There is deliberately no per-frame
// fence in this design; presentation ordering relies on same-queue
// submission order when compute == present.

use crate::error::Result;
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

/// "Image acquired, safe to submit work that writes to it."
pub struct FrameSemaphore {
    pub image_available: vk::Semaphore,
}

impl FrameSemaphore {
    pub fn new(device: &Arc<VulkanDevice>) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();

        let image_available =
            unsafe { device.device.create_semaphore(&semaphore_info, None) }?;

        Ok(Self { image_available })
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
        }
    }
}

// Synchronization primitives
//
// One semaphore pair + fence per frame slot. Fences gate the CPU
// (frame-in-flight backpressure), semaphores order GPU stages and are
// never waited on by the CPU.

use ash::vk;

use super::result::{map_vk, RenderError};

/// Sync triple for one frame slot: "image available" and "render finished"
/// semaphores plus the in-flight fence, created signaled so the first wait
/// on a fresh slot passes immediately.
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &ash::Device) -> Result<Self, RenderError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            let image_available = device
                .create_semaphore(&semaphore_info, None)
                .map_err(|e| map_vk(e, "vkCreateSemaphore"))?;

            let render_finished = match device.create_semaphore(&semaphore_info, None) {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    return Err(map_vk(e, "vkCreateSemaphore"));
                }
            };

            let in_flight = match device.create_fence(&fence_info, None) {
                Ok(fence) => fence,
                Err(e) => {
                    device.destroy_semaphore(image_available, None);
                    device.destroy_semaphore(render_finished, None);
                    return Err(map_vk(e, "vkCreateFence"));
                }
            };

            Ok(Self { image_available, render_finished, in_flight })
        }
    }

    /// Creates one sync triple per frame slot, rolling back on partial failure.
    pub fn new_set(device: &ash::Device, depth: u32) -> Result<Vec<Self>, RenderError> {
        let mut set = Vec::with_capacity(depth as usize);
        for _ in 0..depth {
            match Self::new(device) {
                Ok(sync) => set.push(sync),
                Err(e) => {
                    for sync in &set {
                        sync.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(set)
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

// Buffer resource
//
// CPU-visible staging and GPU-resident storage with an explicit
// map/copy contract. Device-local buffers are filled through recorded
// copy commands, never through `copy`.

use ash::vk;
use std::ffi::c_void;
use std::sync::Arc;

use super::device::Device;
use super::result::{map_vk, RenderError};

/// An arbitrary data buffer with bound device memory.
///
/// Created through [`Device::create_buffer`]; exactly one owner. Host
/// visibility is fixed at creation and decides whether `map`/`copy` are
/// legal or uploads must go through a command buffer.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    host_visible: bool,
    mapped: bool,
}

impl Buffer {
    pub(crate) fn create(
        device: &Arc<Device>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_type: vk::MemoryPropertyFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<Self, RenderError> {
        if size == 0 {
            return Err(RenderError::InvalidParameters);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(sharing_mode);

        let buffer = unsafe {
            device
                .handle()
                .create_buffer(&buffer_info, None)
                .map_err(|e| map_vk(e, "vkCreateBuffer"))?
        };

        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let memory_type_index =
            match device.memory_type_index(requirements.memory_type_bits, memory_type) {
                Ok(index) => index,
                Err(e) => {
                    unsafe { device.handle().destroy_buffer(buffer, None) };
                    return Err(e);
                }
            };

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = unsafe {
            match device.handle().allocate_memory(&alloc_info, None) {
                Ok(memory) => memory,
                Err(e) => {
                    device.handle().destroy_buffer(buffer, None);
                    return Err(map_vk(e, "vkAllocateMemory"));
                }
            }
        };

        unsafe {
            if let Err(e) = device.handle().bind_buffer_memory(buffer, memory, 0) {
                device.handle().destroy_buffer(buffer, None);
                device.handle().free_memory(memory, None);
                return Err(map_vk(e, "vkBindBufferMemory"));
            }
        }

        log::debug!("Created buffer of {} bytes ({:?})", size, usage);

        Ok(Self {
            device: Arc::clone(device),
            buffer,
            memory,
            size,
            host_visible: memory_type.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            mapped: false,
        })
    }

    /// Maps `size` bytes at `offset`, returning a CPU-visible pointer valid
    /// until [`unmap`](Self::unmap). Fails with `InvalidState` if already
    /// mapped or not host-visible, `InvalidParameters` if `size` is zero.
    pub fn map(
        &mut self,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
    ) -> Result<*mut c_void, RenderError> {
        if self.mapped || !self.host_visible {
            return Err(RenderError::InvalidState);
        }

        if size == 0 {
            return Err(RenderError::InvalidParameters);
        }

        let address = unsafe {
            self.device
                .handle()
                .map_memory(self.memory, offset, size, vk::MemoryMapFlags::empty())
                .map_err(|e| map_vk(e, "vkMapMemory"))?
        };

        self.mapped = true;
        Ok(address)
    }

    /// Releases the current mapping. Unmapping a buffer that is not mapped
    /// is a contract violation, symmetric with `map`'s own-state check.
    pub fn unmap(&mut self) -> Result<(), RenderError> {
        if !self.mapped {
            return Err(RenderError::InvalidState);
        }

        unsafe { self.device.handle().unmap_memory(self.memory) };

        self.mapped = false;
        Ok(())
    }

    /// Copies `data` into the buffer at `offset` via map → memcpy → unmap.
    ///
    /// Only legal on host-visible buffers that are not currently mapped;
    /// device-local buffers are filled by recording `CopyBuffer` /
    /// `CopyBufferToImage` commands instead.
    pub fn copy<T: Copy>(&mut self, data: &[T], offset: vk::DeviceSize) -> Result<(), RenderError> {
        if self.mapped {
            return Err(RenderError::InvalidState);
        }

        let byte_size = std::mem::size_of_val(data) as vk::DeviceSize;
        let address = self.map(byte_size, offset)?;

        unsafe {
            (address as *mut T).copy_from_nonoverlapping(data.as_ptr(), data.len());
        }

        self.unmap()
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn is_host_visible(&self) -> bool {
        self.host_visible
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped {
                self.device.handle().unmap_memory(self.memory);
            }

            self.device.handle().destroy_buffer(self.buffer, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

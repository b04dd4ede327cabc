// Image resource
//
// GPU-resident 2D images: sampled textures and the depth/stencil
// attachment. Uploads always run barrier → copy → barrier in one
// synchronous submission, since image memory is never host-visible here.

use ash::vk;
use std::sync::Arc;

use super::buffer::Buffer;
use super::command::Command;
use super::device::Device;
use super::result::{map_vk, RenderError};

/// A 2D image with bound memory, a view, and (for sampled images) a
/// default sampler. Created through [`Device::create_image`].
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: Option<vk::Sampler>,
    width: u32,
    height: u32,
    aspect_mask: vk::ImageAspectFlags,
}

impl Image {
    pub(crate) fn create(
        device: &Arc<Device>,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        aspect_mask: vk::ImageAspectFlags,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::InvalidParameters);
        }

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D { width, height, depth: 1 })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            device
                .handle()
                .create_image(&image_info, None)
                .map_err(|e| map_vk(e, "vkCreateImage"))?
        };

        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let memory_type_index = match device
            .memory_type_index(requirements.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        {
            Ok(index) => index,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
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
                    device.handle().destroy_image(image, None);
                    return Err(map_vk(e, "vkAllocateMemory"));
                }
            }
        };

        unsafe {
            if let Err(e) = device.handle().bind_image_memory(image, memory, 0) {
                device.handle().destroy_image(image, None);
                device.handle().free_memory(memory, None);
                return Err(map_vk(e, "vkBindImageMemory"));
            }
        }

        let view = match device.create_image_view(image, format, aspect_mask) {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.handle().destroy_image(image, None);
                    device.handle().free_memory(memory, None);
                }
                return Err(e);
            }
        };

        // Depth attachments and transfer-only images carry no sampler.
        let sampler = if usage.contains(vk::ImageUsageFlags::SAMPLED) {
            let sampler_info = vk::SamplerCreateInfo::builder()
                .mag_filter(vk::Filter::LINEAR)
                .min_filter(vk::Filter::LINEAR)
                .address_mode_u(vk::SamplerAddressMode::REPEAT)
                .address_mode_v(vk::SamplerAddressMode::REPEAT)
                .address_mode_w(vk::SamplerAddressMode::REPEAT)
                .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                .mipmap_mode(vk::SamplerMipmapMode::LINEAR);

            let sampler = unsafe {
                match device.handle().create_sampler(&sampler_info, None) {
                    Ok(sampler) => sampler,
                    Err(e) => {
                        device.handle().destroy_image_view(view, None);
                        device.handle().destroy_image(image, None);
                        device.handle().free_memory(memory, None);
                        return Err(map_vk(e, "vkCreateSampler"));
                    }
                }
            };

            Some(sampler)
        } else {
            None
        };

        log::debug!("Created {}x{} image ({:?})", width, height, format);

        Ok(Self {
            device: Arc::clone(device),
            image,
            memory,
            view,
            sampler,
            width,
            height,
            aspect_mask,
        })
    }

    /// Uploads pixel data from a staging buffer.
    ///
    /// Records undefined→transfer-dst, the copy, and transfer-dst→
    /// shader-read-only into one command buffer and submits it
    /// synchronously. The image is ready for sampling on return.
    pub fn copy_from_buffer(&self, buffer: &Buffer) -> Result<(), RenderError> {
        let subresource_range = vk::ImageSubresourceRange {
            aspect_mask: self.aspect_mask,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        let to_transfer = [vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::empty())
            .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range)
            .build()];

        let regions = [vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: self.aspect_mask,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D { width: self.width, height: self.height, depth: 1 },
        }];

        let to_shader_read = [vk::ImageMemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(vk::AccessFlags::SHADER_READ)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(subresource_range)
            .build()];

        let commands = [
            Command::InsertBarrier {
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
                dependency_flags: vk::DependencyFlags::empty(),
                memory: &[],
                buffers: &[],
                images: &to_transfer,
            },
            Command::CopyBufferToImage {
                source: buffer.handle(),
                destination: self.image,
                layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                regions: &regions,
            },
            Command::InsertBarrier {
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
                dependency_flags: vk::DependencyFlags::empty(),
                memory: &[],
                buffers: &[],
                images: &to_shader_read,
            },
        ];

        let mut command_buffer = self.device.create_command_buffer(super::device::QueueType::Graphics)?;
        command_buffer.write_single_pass(&commands)?;
        command_buffer.submit()
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn sampler(&self) -> Option<vk::Sampler> {
        self.sampler
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D { width: self.width, height: self.height }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if let Some(sampler) = self.sampler {
                self.device.handle().destroy_sampler(sampler, None);
            }

            self.device.handle().destroy_image_view(self.view, None);
            self.device.handle().destroy_image(self.image, None);
            self.device.handle().free_memory(self.memory, None);
        }
    }
}

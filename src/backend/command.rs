// Command recording and submission
//
// A pool hands out single command buffers; each buffer is an explicit
// Initialized → Recording → Recorded state machine over a typed command
// stream. Single-threaded per instance; no internal locking.

use ash::vk;
use std::sync::Arc;

use super::device::{Device, QueueType};
use super::result::{map_vk, AcquireOutcome, PresentOutcome, RenderError, SubmitOutcome};
use super::target::RenderTarget;

/// One recordable command with its typed payload. Payload shape is fixed
/// by the variant, so writer and buffer agree at compile time.
pub enum Command<'a> {
    BindPipeline {
        point: vk::PipelineBindPoint,
        pipeline: vk::Pipeline,
    },
    BindVertexBuffers {
        first_binding: u32,
        buffers: &'a [vk::Buffer],
        offsets: &'a [vk::DeviceSize],
    },
    BindIndexBuffer {
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    },
    BindDescriptorSets {
        point: vk::PipelineBindPoint,
        layout: vk::PipelineLayout,
        first_set: u32,
        sets: &'a [vk::DescriptorSet],
        dynamic_offsets: &'a [u32],
    },
    SetViewport(vk::Viewport),
    SetScissor(vk::Rect2D),
    SetCullMode(vk::CullModeFlags),
    Draw {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
    InsertBarrier {
        src_stage: vk::PipelineStageFlags,
        dst_stage: vk::PipelineStageFlags,
        dependency_flags: vk::DependencyFlags,
        memory: &'a [vk::MemoryBarrier],
        buffers: &'a [vk::BufferMemoryBarrier],
        images: &'a [vk::ImageMemoryBarrier],
    },
    CopyBuffer {
        source: vk::Buffer,
        destination: vk::Buffer,
        regions: &'a [vk::BufferCopy],
    },
    CopyBufferToImage {
        source: vk::Buffer,
        destination: vk::Image,
        layout: vk::ImageLayout,
        regions: &'a [vk::BufferImageCopy],
    },
    BeginRendering {
        render_area: vk::Rect2D,
        layer_count: u32,
        view_mask: u32,
        color_attachments: &'a [vk::RenderingAttachmentInfo],
        depth_attachment: Option<&'a vk::RenderingAttachmentInfo>,
        stencil_attachment: Option<&'a vk::RenderingAttachmentInfo>,
    },
    EndRendering,
}

/// Recording state of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Initialized,
    Recording,
    Recorded,
}

impl RecordState {
    // The transition table. Begin is legal from Initialized and Recorded
    // (re-recording over old contents); everything else is single-state.
    fn allows_begin(self) -> bool {
        self != RecordState::Recording
    }

    fn allows_write(self) -> bool {
        self == RecordState::Recording
    }

    fn allows_end(self) -> bool {
        self == RecordState::Recording
    }

    fn allows_reset(self) -> bool {
        self == RecordState::Recorded
    }

    fn allows_submit(self) -> bool {
        self == RecordState::Recorded
    }
}

/// Shared inner state co-owned by a pool and its buffers, so a buffer can
/// never hold a handle into a destroyed pool. The native pool is destroyed
/// once the pool wrapper and every allocated buffer are dropped.
pub(crate) struct PoolShared {
    device: Arc<Device>,
    pool: vk::CommandPool,
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        log::debug!("Destroying command pool {:?}", self.pool);
        unsafe { self.device.handle().destroy_command_pool(self.pool, None) };
    }
}

/// A command pool bound to one queue, handing out individually resettable
/// [`CommandBuffer`] instances.
pub struct CommandPool {
    shared: Arc<PoolShared>,
    queue: vk::Queue,
}

impl CommandPool {
    pub(crate) fn create(device: &Arc<Device>, queue_type: QueueType) -> Result<Self, RenderError> {
        let (family, queue) = device.queue_for(queue_type);

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe {
            device
                .handle()
                .create_command_pool(&pool_info, None)
                .map_err(|e| map_vk(e, "vkCreateCommandPool"))?
        };

        Ok(Self {
            shared: Arc::new(PoolShared { device: Arc::clone(device), pool }),
            queue,
        })
    }

    /// Allocates a single primary command buffer, ready to record.
    pub fn allocate(&self) -> Result<CommandBuffer, RenderError> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.shared.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffer = unsafe {
            self.shared
                .device
                .handle()
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| map_vk(e, "vkAllocateCommandBuffers"))?[0]
        };

        Ok(CommandBuffer {
            shared: Arc::clone(&self.shared),
            buffer,
            queue: self.queue,
            state: RecordState::Initialized,
        })
    }
}

/// A single recordable command buffer bound to its owning queue.
///
/// Not copyable; exactly one owner. All operations check the recording
/// state and return `InvalidState` on contract violations without
/// touching the native buffer.
pub struct CommandBuffer {
    shared: Arc<PoolShared>,
    buffer: vk::CommandBuffer,
    queue: vk::Queue,
    state: RecordState,
}

impl CommandBuffer {
    /// Begins recording commands.
    pub fn begin(&mut self) -> Result<(), RenderError> {
        if !self.state.allows_begin() {
            return Err(RenderError::InvalidState);
        }

        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe {
            self.device()
                .begin_command_buffer(self.buffer, &begin_info)
                .map_err(|e| map_vk(e, "vkBeginCommandBuffer"))?;
        }

        self.state = RecordState::Recording;
        Ok(())
    }

    /// Finishes recording commands.
    pub fn end(&mut self) -> Result<(), RenderError> {
        if !self.state.allows_end() {
            return Err(RenderError::InvalidState);
        }

        unsafe {
            self.device()
                .end_command_buffer(self.buffer)
                .map_err(|e| map_vk(e, "vkEndCommandBuffer"))?;
        }

        self.state = RecordState::Recorded;
        Ok(())
    }

    /// Resets the contents of this buffer. Only legal once recorded.
    pub fn reset(&mut self) -> Result<(), RenderError> {
        if !self.state.allows_reset() {
            return Err(RenderError::InvalidState);
        }

        unsafe {
            self.device()
                .reset_command_buffer(self.buffer, vk::CommandBufferResetFlags::empty())
                .map_err(|e| map_vk(e, "vkResetCommandBuffer"))?;
        }

        self.state = RecordState::Initialized;
        Ok(())
    }

    /// Writes a series of commands into the recording buffer. Commands
    /// execute on the GPU in the order written.
    pub fn write(&mut self, commands: &[Command<'_>]) -> Result<(), RenderError> {
        if !self.state.allows_write() {
            return Err(RenderError::InvalidState);
        }

        for command in commands {
            unsafe { self.dispatch(command) };
        }

        Ok(())
    }

    unsafe fn dispatch(&self, command: &Command<'_>) {
        let device = &*self.shared.device;
        let handle = device.handle();
        match *command {
            Command::BindPipeline { point, pipeline } => {
                handle.cmd_bind_pipeline(self.buffer, point, pipeline);
            }

            Command::BindVertexBuffers { first_binding, buffers, offsets } => {
                handle.cmd_bind_vertex_buffers(self.buffer, first_binding, buffers, offsets);
            }

            Command::BindIndexBuffer { buffer, offset, index_type } => {
                handle.cmd_bind_index_buffer(self.buffer, buffer, offset, index_type);
            }

            Command::BindDescriptorSets { point, layout, first_set, sets, dynamic_offsets } => {
                handle.cmd_bind_descriptor_sets(
                    self.buffer,
                    point,
                    layout,
                    first_set,
                    sets,
                    dynamic_offsets,
                );
            }

            Command::SetViewport(viewport) => {
                handle.cmd_set_viewport(self.buffer, 0, &[viewport]);
            }

            Command::SetScissor(scissor) => {
                handle.cmd_set_scissor(self.buffer, 0, &[scissor]);
            }

            Command::SetCullMode(mode) => {
                device.extended_dynamic_state().cmd_set_cull_mode(self.buffer, mode);
            }

            Command::Draw { vertex_count, instance_count, first_vertex, first_instance } => {
                handle.cmd_draw(
                    self.buffer,
                    vertex_count,
                    instance_count,
                    first_vertex,
                    first_instance,
                );
            }

            Command::DrawIndexed {
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            } => {
                handle.cmd_draw_indexed(
                    self.buffer,
                    index_count,
                    instance_count,
                    first_index,
                    vertex_offset,
                    first_instance,
                );
            }

            Command::InsertBarrier {
                src_stage,
                dst_stage,
                dependency_flags,
                memory,
                buffers,
                images,
            } => {
                handle.cmd_pipeline_barrier(
                    self.buffer,
                    src_stage,
                    dst_stage,
                    dependency_flags,
                    memory,
                    buffers,
                    images,
                );
            }

            Command::CopyBuffer { source, destination, regions } => {
                handle.cmd_copy_buffer(self.buffer, source, destination, regions);
            }

            Command::CopyBufferToImage { source, destination, layout, regions } => {
                handle.cmd_copy_buffer_to_image(self.buffer, source, destination, layout, regions);
            }

            Command::BeginRendering {
                render_area,
                layer_count,
                view_mask,
                color_attachments,
                depth_attachment,
                stencil_attachment,
            } => {
                let mut rendering_info = vk::RenderingInfo::builder()
                    .render_area(render_area)
                    .layer_count(layer_count)
                    .view_mask(view_mask)
                    .color_attachments(color_attachments);

                if let Some(depth) = depth_attachment {
                    rendering_info = rendering_info.depth_attachment(depth);
                }

                if let Some(stencil) = stencil_attachment {
                    rendering_info = rendering_info.stencil_attachment(stencil);
                }

                device.dynamic_rendering().cmd_begin_rendering(self.buffer, &rendering_info);
            }

            Command::EndRendering => {
                device.dynamic_rendering().cmd_end_rendering(self.buffer);
            }
        }
    }

    /// Resets if necessary, then begins, writes and ends in one pass.
    ///
    /// On a partial failure the buffer may be left `Recording`; callers
    /// must not reuse it without a successful reset.
    pub fn write_single_pass(&mut self, commands: &[Command<'_>]) -> Result<(), RenderError> {
        match self.state {
            RecordState::Initialized => {}
            RecordState::Recording => return Err(RenderError::InvalidState),
            RecordState::Recorded => self.reset()?,
        }

        self.begin()?;
        self.write(commands)?;
        self.end()
    }

    /// Submits this buffer for synchronous execution and blocks until the
    /// GPU finishes. For one-off work (uploads, layout transitions) where
    /// frame pacing is irrelevant.
    pub fn submit(&mut self) -> Result<(), RenderError> {
        if !self.state.allows_submit() {
            return Err(RenderError::InvalidState);
        }

        let device = self.device();

        let fence_info = vk::FenceCreateInfo::builder();
        let fence = unsafe {
            device
                .create_fence(&fence_info, None)
                .map_err(|e| map_vk(e, "vkCreateFence"))?
        };

        let buffers = [self.buffer];
        let submit_info = vk::SubmitInfo::builder().command_buffers(&buffers).build();

        let result = unsafe {
            device
                .queue_submit(self.queue, &[submit_info], fence)
                .map_err(|e| map_vk(e, "vkQueueSubmit"))
                .and_then(|()| {
                    device
                        .wait_for_fences(&[fence], true, u64::MAX)
                        .map_err(|e| map_vk(e, "vkWaitForFences"))
                })
        };

        unsafe { device.destroy_fence(fence, None) };
        result
    }

    /// Submits this buffer for drawing to the given target, using the
    /// target's synchronization capabilities if available, then presents.
    ///
    /// The simple path: waits for the whole device to go idle after
    /// presenting. Suitable for low-frequency or tooling use; frame loops
    /// wanting CPU/GPU overlap use
    /// [`submit_to_target_pipelined`](Self::submit_to_target_pipelined).
    pub fn submit_to_target(
        &mut self,
        target: &mut dyn RenderTarget,
    ) -> Result<SubmitOutcome, RenderError> {
        self.submit_frame(target, true)
    }

    /// Like [`submit_to_target`](Self::submit_to_target) but without the
    /// device-idle wait: slot reuse is gated solely by the per-frame fence
    /// that the next acquisition waits on, enabling true frame overlap.
    pub fn submit_to_target_pipelined(
        &mut self,
        target: &mut dyn RenderTarget,
    ) -> Result<SubmitOutcome, RenderError> {
        self.submit_frame(target, false)
    }

    fn submit_frame(
        &mut self,
        target: &mut dyn RenderTarget,
        wait_idle: bool,
    ) -> Result<SubmitOutcome, RenderError> {
        if !self.state.allows_submit() {
            return Err(RenderError::InvalidState);
        }

        let acquired = match target.acquire_next()? {
            AcquireOutcome::Ready(image) => image,
            AcquireOutcome::Suboptimal => return Ok(SubmitOutcome::Suboptimal),
        };

        let buffers = [self.buffer];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        // Targets that synchronize internally hand out no semaphores; the
        // submission then carries no waits, signals and no fence. The
        // semaphore arrays must outlive the submit call below.
        let wait_semaphores = [acquired.sync.map_or(vk::Semaphore::null(), |s| s.available)];
        let signal_semaphores = [acquired.sync.map_or(vk::Semaphore::null(), |s| s.rendered)];
        let fence = acquired.sync.map_or(vk::Fence::null(), |s| s.in_flight);

        let submit_info = if acquired.sync.is_some() {
            vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semaphores)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&buffers)
                .signal_semaphores(&signal_semaphores)
                .build()
        } else {
            vk::SubmitInfo::builder().command_buffers(&buffers).build()
        };

        unsafe {
            self.shared
                .device
                .handle()
                .queue_submit(self.shared.device.graphics_queue(), &[submit_info], fence)
                .map_err(|e| map_vk(e, "vkQueueSubmit"))?;
        }

        match target.present()? {
            PresentOutcome::Suboptimal => return Ok(SubmitOutcome::Suboptimal),
            PresentOutcome::Complete => {}
        }

        if wait_idle {
            self.shared.device.wait_idle()?;
        }

        Ok(SubmitOutcome::Complete)
    }

    pub fn record_state(&self) -> RecordState {
        self.state
    }

    pub fn handle(&self) -> vk::CommandBuffer {
        self.buffer
    }

    fn device(&self) -> &ash::Device {
        self.shared.device.handle()
    }
}

impl Drop for CommandBuffer {
    fn drop(&mut self) {
        unsafe {
            self.shared
                .device
                .handle()
                .free_command_buffers(self.shared.pool, &[self.buffer]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RecordState::{Initialized, Recorded, Recording};

    #[test]
    fn begin_is_legal_outside_recording() {
        assert!(Initialized.allows_begin());
        assert!(Recorded.allows_begin());
        assert!(!Recording.allows_begin());
    }

    #[test]
    fn write_and_end_require_recording() {
        for state in [Initialized, Recorded] {
            assert!(!state.allows_write());
            assert!(!state.allows_end());
        }
        assert!(Recording.allows_write());
        assert!(Recording.allows_end());
    }

    #[test]
    fn reset_and_submit_require_recorded() {
        for state in [Initialized, Recording] {
            assert!(!state.allows_reset());
            assert!(!state.allows_submit());
        }
        assert!(Recorded.allows_reset());
        assert!(Recorded.allows_submit());
    }
}

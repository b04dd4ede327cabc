// Pipeline handle
//
// Shader compilation and pipeline/descriptor construction live in the
// shader subsystem; this layer only binds a pipeline to a target's
// attachment formats and forwards the handle into command recording.

use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::swapchain::DEPTH_FORMAT;
use super::target::RenderTarget;

/// Opaque pipeline handle bound to a render target's color format.
///
/// Created empty by [`Device::create_pipeline`]; the shader subsystem
/// builds the native pipeline against the recorded formats and adopts it
/// here. Dropping the handle destroys the adopted objects.
pub struct Pipeline {
    device: Arc<Device>,
    color_format: vk::Format,
    depth_format: vk::Format,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl Pipeline {
    pub(crate) fn create(device: &Arc<Device>, target: &dyn RenderTarget) -> Self {
        Self {
            device: Arc::clone(device),
            color_format: target.color_format(),
            depth_format: DEPTH_FORMAT,
            raw: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
        }
    }

    /// Adopts a native pipeline built for this handle's formats, replacing
    /// (and destroying) any previously adopted one.
    pub fn adopt(&mut self, pipeline: vk::Pipeline, layout: vk::PipelineLayout) {
        self.destroy_raw();
        self.raw = pipeline;
        self.layout = layout;
    }

    /// Color format the pipeline must render to.
    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Depth/stencil format the pipeline must test against.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.raw
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    fn destroy_raw(&mut self) {
        unsafe {
            if self.raw != vk::Pipeline::null() {
                self.device.handle().destroy_pipeline(self.raw, None);
            }

            if self.layout != vk::PipelineLayout::null() {
                self.device.handle().destroy_pipeline_layout(self.layout, None);
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.destroy_raw();
    }
}

// Backend module - Vulkan abstraction layer
//
// Thin, explicit wrapper around ash: device and queue ownership,
// recordable command buffers, resources, and the acquire/render/present
// cycle over the two render-target kinds.

pub mod buffer;
pub mod command;
pub mod device;
pub mod image;
pub mod pipeline;
pub mod result;
pub mod stereo;
pub mod swapchain;
pub mod sync;
pub mod target;

pub use buffer::Buffer;
pub use command::{Command, CommandBuffer, CommandPool, RecordState};
pub use device::{Device, QueueType};
pub use image::Image;
pub use pipeline::Pipeline;
pub use result::{AcquireOutcome, PresentOutcome, RenderError, SubmitOutcome};
pub use stereo::{Compositor, StereoImageSet, StereoTarget};
pub use swapchain::{SurfaceTarget, DEPTH_FORMAT};
pub use target::{AcquiredImage, FrameSyncHandles, RenderTarget};

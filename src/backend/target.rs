// Render target interface
//
// Uniform acquire/present contract over the closed set of target kinds:
// the on-screen surface target and the compositor-driven stereo target.

use ash::vk;

use super::result::{AcquireOutcome, PresentOutcome, RenderError};

/// Sync handles for one acquired image. Only present when the target
/// relies on caller-visible synchronization; compositor-driven targets
/// manage synchronization internally and hand out `None`.
#[derive(Debug, Clone, Copy)]
pub struct FrameSyncHandles {
    /// Signaled by the presentation engine when the image may be written.
    pub available: vk::Semaphore,
    /// Signaled by the submission that finishes rendering into the image.
    pub rendered: vk::Semaphore,
    /// Signaled when the frame's GPU work completes; gates slot reuse.
    pub in_flight: vk::Fence,
}

/// An image handed out by [`RenderTarget::acquire_next`].
#[derive(Debug, Clone, Copy)]
pub struct AcquiredImage {
    pub image: vk::Image,
    pub sync: Option<FrameSyncHandles>,
}

/// Presentation capability shared by all render-target kinds.
///
/// Each frame: `acquire_next` yields the image to record into, the caller
/// submits work gated on the image's sync handles, then `present` queues
/// the image for display. Targets are driven by a single thread.
pub trait RenderTarget {
    /// Acquires the next presentable image, blocking on the slot's
    /// in-flight fence first where the target tracks frames in flight.
    fn acquire_next(&mut self) -> Result<AcquireOutcome, RenderError>;

    /// Presents the last acquired image.
    fn present(&mut self) -> Result<PresentOutcome, RenderError>;

    /// Extent of the target, or of a single eye for stereo targets.
    fn extent(&self) -> vk::Extent2D;

    /// Display color format.
    fn color_format(&self) -> vk::Format;

    /// Number of images managed by the target.
    fn image_count(&self) -> u32;

    /// Index of the image to be drawn next, as returned by acquisition.
    fn current_image_index(&self) -> u32;

    /// Bare color image for the given index.
    fn color_image(&self, index: u32) -> vk::Image;

    /// Bare color image view for the given index.
    fn color_image_view(&self, index: u32) -> vk::ImageView;

    /// Bare depth image view for the given index.
    fn depth_image_view(&self, index: u32) -> vk::ImageView;
}

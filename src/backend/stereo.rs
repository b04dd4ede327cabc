// Stereo render target - compositor presentation
//
// Renders into image sets owned by an external compositor (an XR runtime
// or similar). The compositor paces frames and synchronizes image access
// internally, so acquired images carry no caller-visible sync handles.

use ash::vk;

use super::result::{AcquireOutcome, PresentOutcome, RenderError};
use super::target::{AcquiredImage, RenderTarget};

/// Driver interface into the external compositor.
///
/// `acquire` blocks (with the compositor's own bounded wait) until the
/// next image in the set may be written, returning its index; `release`
/// hands the rendered image back for composition. Both report compositor
/// failures through the shared taxonomy: `DeviceLost` for a lost runtime
/// instance, `SurfaceLost` for a lost session.
pub trait Compositor {
    fn acquire(&mut self) -> Result<u32, RenderError>;
    fn release(&mut self) -> Result<(), RenderError>;
}

/// Color/depth image sets handed over by the compositor at session setup.
/// Color and depth sets are index-aligned: acquiring index `i` selects
/// `color_images[i]`, `color_views[i]` and `depth_views[i]`.
pub struct StereoImageSet {
    pub color_images: Vec<vk::Image>,
    pub color_views: Vec<vk::ImageView>,
    pub depth_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    pub color_format: vk::Format,
}

/// Render target over a compositor-owned stereo swap-set.
pub struct StereoTarget {
    compositor: Box<dyn Compositor>,
    set: StereoImageSet,
    image_index: u32,
}

impl StereoTarget {
    pub(crate) fn create(
        compositor: Box<dyn Compositor>,
        set: StereoImageSet,
    ) -> Result<Self, RenderError> {
        if set.color_images.is_empty()
            || set.color_images.len() != set.color_views.len()
            || set.color_images.len() != set.depth_views.len()
            || set.extent.width == 0
            || set.extent.height == 0
        {
            return Err(RenderError::InvalidParameters);
        }

        log::info!(
            "Creating stereo target: {}x{} per eye, {} images, {:?}",
            set.extent.width,
            set.extent.height,
            set.color_images.len(),
            set.color_format
        );

        Ok(Self { compositor, set, image_index: 0 })
    }
}

impl RenderTarget for StereoTarget {
    fn acquire_next(&mut self) -> Result<AcquireOutcome, RenderError> {
        let index = self.compositor.acquire()?;
        if index as usize >= self.set.color_images.len() {
            return Err(RenderError::InvalidParameters);
        }

        self.image_index = index;

        // The compositor serializes image access on its side; handing out
        // sync primitives here would invite waits that never complete.
        Ok(AcquireOutcome::Ready(AcquiredImage {
            image: self.set.color_images[index as usize],
            sync: None,
        }))
    }

    fn present(&mut self) -> Result<PresentOutcome, RenderError> {
        self.compositor.release()?;
        Ok(PresentOutcome::Complete)
    }

    fn extent(&self) -> vk::Extent2D {
        self.set.extent
    }

    fn color_format(&self) -> vk::Format {
        self.set.color_format
    }

    fn image_count(&self) -> u32 {
        self.set.color_images.len() as u32
    }

    fn current_image_index(&self) -> u32 {
        self.image_index
    }

    fn color_image(&self, index: u32) -> vk::Image {
        self.set.color_images[index as usize]
    }

    fn color_image_view(&self, index: u32) -> vk::ImageView {
        self.set.color_views[index as usize]
    }

    fn depth_image_view(&self, index: u32) -> vk::ImageView {
        self.set.depth_views[index as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedCompositor {
        indices: Vec<u32>,
        cursor: usize,
    }

    impl Compositor for ScriptedCompositor {
        fn acquire(&mut self) -> Result<u32, RenderError> {
            let index = self.indices[self.cursor % self.indices.len()];
            self.cursor += 1;
            Ok(index)
        }

        fn release(&mut self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn image_set(count: usize) -> StereoImageSet {
        StereoImageSet {
            color_images: vec![vk::Image::null(); count],
            color_views: vec![vk::ImageView::null(); count],
            depth_views: vec![vk::ImageView::null(); count],
            extent: vk::Extent2D { width: 1440, height: 1600 },
            color_format: vk::Format::R8G8B8A8_SRGB,
        }
    }

    #[test]
    fn acquired_images_carry_no_sync_handles() {
        let compositor = ScriptedCompositor { indices: vec![0], cursor: 0 };
        let mut target = StereoTarget::create(Box::new(compositor), image_set(2)).unwrap();

        match target.acquire_next().unwrap() {
            AcquireOutcome::Ready(image) => assert!(image.sync.is_none()),
            AcquireOutcome::Suboptimal => panic!("compositor acquire cannot be suboptimal"),
        }
    }

    #[test]
    fn tracks_compositor_image_index() {
        let compositor = ScriptedCompositor { indices: vec![1, 0, 2], cursor: 0 };
        let mut target = StereoTarget::create(Box::new(compositor), image_set(3)).unwrap();

        for expected in [1, 0, 2] {
            target.acquire_next().unwrap();
            assert_eq!(target.current_image_index(), expected);
            assert!(matches!(target.present(), Ok(PresentOutcome::Complete)));
        }
    }

    #[test]
    fn out_of_range_compositor_index_is_rejected() {
        let compositor = ScriptedCompositor { indices: vec![5], cursor: 0 };
        let mut target = StereoTarget::create(Box::new(compositor), image_set(2)).unwrap();

        assert!(matches!(target.acquire_next(), Err(RenderError::InvalidParameters)));
    }

    #[test]
    fn mismatched_image_sets_are_rejected() {
        let compositor = ScriptedCompositor { indices: vec![0], cursor: 0 };
        let mut set = image_set(2);
        set.depth_views.pop();

        assert!(matches!(
            StereoTarget::create(Box::new(compositor), set),
            Err(RenderError::InvalidParameters)
        ));
    }

    #[test]
    fn zero_extent_is_rejected() {
        let compositor = ScriptedCompositor { indices: vec![0], cursor: 0 };
        let mut set = image_set(2);
        set.extent.height = 0;

        assert!(matches!(
            StereoTarget::create(Box::new(compositor), set),
            Err(RenderError::InvalidParameters)
        ));
    }
}

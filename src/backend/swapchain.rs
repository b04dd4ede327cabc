// Surface render target - window presentation
//
// Owns the swapchain, its swap-set of images, one depth/stencil image and
// the per-frame sync triples. The frame counter walks the sync slots; the
// image index comes back from acquisition and the two are decoupled since
// the presentation engine may return images out of order.

use ash::extensions::khr;
use ash::vk;
use std::sync::Arc;

use super::device::Device;
use super::image::Image;
use super::result::{map_vk, AcquireOutcome, PresentOutcome, RenderError};
use super::sync::FrameSync;
use super::target::{AcquiredImage, FrameSyncHandles, RenderTarget};
use crate::shell::Shell;

/// Depth/stencil attachment format used by every surface target.
pub const DEPTH_FORMAT: vk::Format = vk::Format::D24_UNORM_S8_UINT;

/// Frame-slot counter: advances once per successful or suboptimal present,
/// wrapping at the swap depth.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameCounter {
    value: u32,
    depth: u32,
}

impl FrameCounter {
    pub(crate) fn new(depth: u32) -> Self {
        Self { value: 0, depth }
    }

    pub(crate) fn value(&self) -> u32 {
        self.value
    }

    pub(crate) fn index(&self) -> usize {
        self.value as usize
    }

    pub(crate) fn advance(&mut self) {
        self.value = (self.value + 1) % self.depth;
    }
}

/// Prefer SRGB; fall back to whatever the surface offers first.
pub(crate) fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
) -> Result<vk::SurfaceFormatKHR, RenderError> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
        .ok_or(RenderError::Unsupported)
}

/// Preferred mode if supported, then MAILBOX, then FIFO (always available).
pub(crate) fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else if modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's fixed current extent when it reports one, otherwise the
/// shell's drawable extent clamped into the supported range.
pub(crate) fn resolve_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    drawable: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX
        && capabilities.current_extent.height != u32::MAX
    {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: drawable.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: drawable.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// On-screen render target backed by a window surface.
pub struct SurfaceTarget {
    device: Arc<Device>,
    shell: Box<dyn Shell>,

    surface: vk::SurfaceKHR,
    swapchain_loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,

    capabilities: vk::SurfaceCapabilitiesKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    depth: u32,

    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_image: Image,

    sync: Vec<FrameSync>,
    frame: FrameCounter,
    image_index: u32,

    acquire_timeout_ns: u64,
}

impl SurfaceTarget {
    pub(crate) fn create(
        device: &Arc<Device>,
        shell: Box<dyn Shell>,
        surface: vk::SurfaceKHR,
        depth: u32,
        preferred_present_mode: vk::PresentModeKHR,
        acquire_timeout_ns: u64,
    ) -> Result<Self, RenderError> {
        if depth < 2 {
            return Err(RenderError::InvalidParameters);
        }

        let surface_loader = device.surface_loader().ok_or(RenderError::Unsupported)?;

        // The graphics queue doubles as the present queue; bail out early
        // on platforms where it cannot present to this surface.
        let supported = unsafe {
            surface_loader
                .get_physical_device_surface_support(
                    device.physical_device(),
                    device.graphics_queue_family(),
                    surface,
                )
                .map_err(|e| map_vk(e, "vkGetPhysicalDeviceSurfaceSupportKHR"))?
        };

        if !supported {
            return Err(RenderError::Unsupported);
        }

        let capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(device.physical_device(), surface)
                .map_err(|e| map_vk(e, "vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?
        };

        let formats = unsafe {
            surface_loader
                .get_physical_device_surface_formats(device.physical_device(), surface)
                .map_err(|e| map_vk(e, "vkGetPhysicalDeviceSurfaceFormatsKHR"))?
        };

        let present_modes = unsafe {
            surface_loader
                .get_physical_device_surface_present_modes(device.physical_device(), surface)
                .map_err(|e| map_vk(e, "vkGetPhysicalDeviceSurfacePresentModesKHR"))?
        };

        let format = choose_surface_format(&formats)?;
        let present_mode = choose_present_mode(&present_modes, preferred_present_mode);
        let extent = resolve_extent(&capabilities, shell.drawable_extent());

        log::info!(
            "Creating surface target: {}x{}, {:?}, {:?}, depth {}",
            extent.width,
            extent.height,
            format.format,
            present_mode,
            depth
        );

        let swapchain_loader = khr::Swapchain::new(device.instance(), device.handle());

        let (swapchain, images, image_views) = build_swap_set(
            device,
            &swapchain_loader,
            surface,
            &capabilities,
            format,
            present_mode,
            extent,
            depth,
        )?;

        let depth_image = match create_depth_image(device, extent) {
            Ok(image) => image,
            Err(e) => {
                destroy_swap_set(device, &swapchain_loader, swapchain, &image_views);
                return Err(e);
            }
        };

        if let Err(e) = prepare_images(device, &images, &depth_image) {
            destroy_swap_set(device, &swapchain_loader, swapchain, &image_views);
            return Err(e);
        }

        let sync = match FrameSync::new_set(device.handle(), depth) {
            Ok(sync) => sync,
            Err(e) => {
                destroy_swap_set(device, &swapchain_loader, swapchain, &image_views);
                return Err(e);
            }
        };

        Ok(Self {
            device: Arc::clone(device),
            shell,
            surface,
            swapchain_loader,
            swapchain,
            capabilities,
            format,
            present_mode,
            extent,
            depth,
            images,
            image_views,
            depth_image,
            sync,
            frame: FrameCounter::new(depth),
            image_index: 0,
            acquire_timeout_ns,
        })
    }

    /// Rebuilds the swap-set and depth image against the surface's current
    /// properties. Called after observing `Suboptimal` or an explicit
    /// resize. Sync triples are retained; the swap depth never changes.
    pub fn recreate(&mut self) -> Result<(), RenderError> {
        self.device.wait_idle()?;

        let surface_loader = self.device.surface_loader().ok_or(RenderError::Unsupported)?;

        self.capabilities = unsafe {
            surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device(), self.surface)
                .map_err(|e| map_vk(e, "vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?
        };

        self.extent = resolve_extent(&self.capabilities, self.shell.drawable_extent());

        log::info!("Recreating swap-set: {}x{}", self.extent.width, self.extent.height);

        destroy_swap_set(&self.device, &self.swapchain_loader, self.swapchain, &self.image_views);
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
        self.image_views.clear();

        let (swapchain, images, image_views) = build_swap_set(
            &self.device,
            &self.swapchain_loader,
            self.surface,
            &self.capabilities,
            self.format,
            self.present_mode,
            self.extent,
            self.depth,
        )?;

        self.swapchain = swapchain;
        self.images = images;
        self.image_views = image_views;

        self.depth_image = create_depth_image(&self.device, self.extent)?;
        prepare_images(&self.device, &self.images, &self.depth_image)
    }

    /// Sync-slot counter value; equals the number of successful presents
    /// modulo the swap depth.
    pub fn frame_counter(&self) -> u32 {
        self.frame.value()
    }

    pub fn swap_depth(&self) -> u32 {
        self.depth
    }
}

impl RenderTarget for SurfaceTarget {
    fn acquire_next(&mut self) -> Result<AcquireOutcome, RenderError> {
        let slot = self.frame.index();
        let device = self.device.handle();

        // Backpressure: block until the GPU finished the frame that last
        // used this slot.
        unsafe {
            device
                .wait_for_fences(&[self.sync[slot].in_flight], true, u64::MAX)
                .map_err(|e| map_vk(e, "vkWaitForFences"))?;
        }

        // Bounded timeout so a lost or minimized surface cannot hang the
        // process; a timeout degrades into the recreate path.
        let acquired = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                self.acquire_timeout_ns,
                self.sync[slot].image_available,
                vk::Fence::null(),
            )
        };

        // SUBOPTIMAL_KHR on acquire still yields a usable image; the later
        // present reports it. Only OUT_OF_DATE and a timeout carry none.
        self.image_index = match acquired {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR)
            | Err(vk::Result::TIMEOUT)
            | Err(vk::Result::NOT_READY) => return Ok(AcquireOutcome::Suboptimal),
            Err(e) => return Err(map_vk(e, "vkAcquireNextImageKHR")),
        };

        // Clear the fence only after acquisition succeeded, so a skipped
        // frame leaves the slot's gate intact.
        unsafe {
            device
                .reset_fences(&[self.sync[slot].in_flight])
                .map_err(|e| map_vk(e, "vkResetFences"))?;
        }

        Ok(AcquireOutcome::Ready(AcquiredImage {
            image: self.images[self.image_index as usize],
            sync: Some(FrameSyncHandles {
                available: self.sync[slot].image_available,
                rendered: self.sync[slot].render_finished,
                in_flight: self.sync[slot].in_flight,
            }),
        }))
    }

    fn present(&mut self) -> Result<PresentOutcome, RenderError> {
        let slot = self.frame.index();

        let wait_semaphores = [self.sync[slot].render_finished];
        let swapchains = [self.swapchain];
        let image_indices = [self.image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue(), &present_info)
        };

        // The frame counter advances on every outcome that queued the
        // image; hard failures leave it untouched.
        match result {
            Ok(false) => {
                self.frame.advance();
                Ok(PresentOutcome::Complete)
            }
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.frame.advance();
                Ok(PresentOutcome::Suboptimal)
            }
            Err(e) => Err(map_vk(e, "vkQueuePresentKHR")),
        }
    }

    fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn color_format(&self) -> vk::Format {
        self.format.format
    }

    fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    fn current_image_index(&self) -> u32 {
        self.image_index
    }

    fn color_image(&self, index: u32) -> vk::Image {
        self.images[index as usize]
    }

    fn color_image_view(&self, index: u32) -> vk::ImageView {
        self.image_views[index as usize]
    }

    fn depth_image_view(&self, _index: u32) -> vk::ImageView {
        // One depth image is shared by every swap image; frames are
        // serialized over it by the per-slot fences.
        self.depth_image.view()
    }
}

impl Drop for SurfaceTarget {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();

        for sync in &self.sync {
            sync.destroy(self.device.handle());
        }

        destroy_swap_set(&self.device, &self.swapchain_loader, self.swapchain, &self.image_views);

        if let Some(surface_loader) = self.device.surface_loader() {
            unsafe { surface_loader.destroy_surface(self.surface, None) };
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build_swap_set(
    device: &Arc<Device>,
    swapchain_loader: &khr::Swapchain,
    surface: vk::SurfaceKHR,
    capabilities: &vk::SurfaceCapabilitiesKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    depth: u32,
) -> Result<(vk::SwapchainKHR, Vec<vk::Image>, Vec<vk::ImageView>), RenderError> {
    let mut min_image_count = depth.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        min_image_count = min_image_count.min(capabilities.max_image_count);
    }

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(min_image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
        .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        .pre_transform(capabilities.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true);

    let swapchain = unsafe {
        swapchain_loader
            .create_swapchain(&create_info, None)
            .map_err(|e| map_vk(e, "vkCreateSwapchainKHR"))?
    };

    let images = unsafe {
        match swapchain_loader.get_swapchain_images(swapchain) {
            Ok(images) => images,
            Err(e) => {
                swapchain_loader.destroy_swapchain(swapchain, None);
                return Err(map_vk(e, "vkGetSwapchainImagesKHR"));
            }
        }
    };

    log::debug!("Swap-set holds {} images", images.len());

    let mut image_views = Vec::with_capacity(images.len());
    for &image in &images {
        match device.create_image_view(image, format.format, vk::ImageAspectFlags::COLOR) {
            Ok(view) => image_views.push(view),
            Err(e) => {
                destroy_swap_set(device, swapchain_loader, swapchain, &image_views);
                return Err(e);
            }
        }
    }

    Ok((swapchain, images, image_views))
}

fn destroy_swap_set(
    device: &Arc<Device>,
    swapchain_loader: &khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    image_views: &[vk::ImageView],
) {
    unsafe {
        for &view in image_views {
            device.handle().destroy_image_view(view, None);
        }

        if swapchain != vk::SwapchainKHR::null() {
            swapchain_loader.destroy_swapchain(swapchain, None);
        }
    }
}

fn create_depth_image(device: &Arc<Device>, extent: vk::Extent2D) -> Result<Image, RenderError> {
    Image::create(
        device,
        extent.width,
        extent.height,
        DEPTH_FORMAT,
        vk::ImageTiling::OPTIMAL,
        vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
    )
}

/// Transitions every swap image to a presentable layout and the depth
/// image to its attachment layout, in one synchronous submission.
fn prepare_images(
    device: &Arc<Device>,
    images: &[vk::Image],
    depth_image: &Image,
) -> Result<(), RenderError> {
    let color_range = vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    };

    let color_barriers: Vec<vk::ImageMemoryBarrier> = images
        .iter()
        .map(|&image| {
            vk::ImageMemoryBarrier::builder()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::empty())
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(image)
                .subresource_range(color_range)
                .build()
        })
        .collect();

    let depth_barriers = [vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::empty())
        .dst_access_mask(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        )
        .old_layout(vk::ImageLayout::UNDEFINED)
        .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(depth_image.handle())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        })
        .build()];

    let commands = [
        super::command::Command::InsertBarrier {
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            dependency_flags: vk::DependencyFlags::empty(),
            memory: &[],
            buffers: &[],
            images: &color_barriers,
        },
        super::command::Command::InsertBarrier {
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            dependency_flags: vk::DependencyFlags::empty(),
            memory: &[],
            buffers: &[],
            images: &depth_barriers,
        },
    ];

    let mut command_buffer = device.create_command_buffer(super::device::QueueType::Graphics)?;
    command_buffer.write_single_pass(&commands)?;
    command_buffer.submit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_counter_cycles_at_depth() {
        let mut frame = FrameCounter::new(3);
        let mut seen = Vec::new();
        for _ in 0..6 {
            frame.advance();
            seen.push(frame.value());
        }

        assert_eq!(seen, [1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn prefers_srgb_surface_format() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn falls_back_to_first_surface_format() {
        let formats = [vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }];

        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
    }

    #[test]
    fn no_surface_formats_is_unsupported() {
        assert!(matches!(choose_surface_format(&[]), Err(RenderError::Unsupported)));
    }

    #[test]
    fn present_mode_selection_degrades_to_fifo() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(
            choose_present_mode(&all, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::IMMEDIATE
        );

        let no_immediate = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&no_immediate, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::MAILBOX
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(
            choose_present_mode(&fifo_only, vk::PresentModeKHR::IMMEDIATE),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn extent_uses_surface_fixed_size_when_reported() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: 800, height: 600 },
            ..Default::default()
        };

        let extent = resolve_extent(&capabilities, vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_drawable_size_otherwise() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D { width: u32::MAX, height: u32::MAX },
            min_image_extent: vk::Extent2D { width: 64, height: 64 },
            max_image_extent: vk::Extent2D { width: 1280, height: 720 },
            ..Default::default()
        };

        let extent = resolve_extent(&capabilities, vk::Extent2D { width: 1920, height: 32 });
        assert_eq!((extent.width, extent.height), (1280, 64));
    }
}

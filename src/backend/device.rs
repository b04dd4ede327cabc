// Device - core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device selection (prefer discrete GPU)
// - Logical device + queue creation (graphics, optional transfer)
// - Factory for every other component, so memory types and queue
//   family ownership are established once

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use super::buffer::Buffer;
use super::command::{CommandBuffer, CommandPool};
use super::image::Image;
use super::pipeline::Pipeline;
use super::result::{map_vk, RenderError};
use super::stereo::{Compositor, StereoImageSet, StereoTarget};
use super::swapchain::SurfaceTarget;
use super::target::RenderTarget;
use crate::config::Config;
use crate::shell::Shell;

/// Required device features for this layer
const REQUIRED_DEVICE_FEATURES: vk::PhysicalDeviceFeatures = vk::PhysicalDeviceFeatures {
    fill_mode_non_solid: vk::TRUE,
    sampler_anisotropy: vk::TRUE,

    ..unsafe { std::mem::zeroed() }
};

/// Queue a command buffer records against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueType {
    Graphics,
    Transfer,
}

/// Logical device wrapper owning the queues and acting as the single
/// factory for buffers, images, command buffers, targets and pipelines.
///
/// Never copied; handed around as `Arc`. Every created resource keeps its
/// `Arc` alive, so resources are always destroyed before the device.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    instance: ash::Instance,
    entry: Entry,

    graphics_queue: vk::Queue,
    graphics_queue_family: u32,
    /// Dedicated transfer queue; absent means the graphics queue is reused.
    transfer_queue: Option<(u32, vk::Queue)>,

    surface_loader: Option<khr::Surface>,
    dynamic_rendering: khr::DynamicRendering,
    extended_dynamic_state: ext::ExtendedDynamicState,

    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl Device {
    /// Creates a headless device: no surface support, suitable for
    /// compute-style work, uploads and the stereo target.
    pub fn new(app_name: &str, config: &Config) -> Result<Arc<Self>, RenderError> {
        Self::create(app_name, config, None)
    }

    /// Creates a device able to present to surfaces of the given display.
    pub fn with_presentation(
        app_name: &str,
        config: &Config,
        display: RawDisplayHandle,
    ) -> Result<Arc<Self>, RenderError> {
        Self::create(app_name, config, Some(display))
    }

    fn create(
        app_name: &str,
        config: &Config,
        display: Option<RawDisplayHandle>,
    ) -> Result<Arc<Self>, RenderError> {
        log::info!("Creating device: {}", app_name);

        let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;

        let entry = unsafe {
            Entry::load().map_err(|e| {
                log::error!("Failed to load Vulkan library: {e}");
                RenderError::Unsupported
            })?
        };

        let instance = Self::create_instance(&entry, app_name, enable_validation, display)?;

        let debug_utils = if enable_validation {
            Some(Self::setup_debug_messenger(&entry, &instance)?)
        } else {
            None
        };

        let (physical_device, graphics_queue_family, transfer_queue_family) =
            Self::pick_physical_device(&instance)?;

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        log::info!(
            "Selected GPU: {}",
            unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy()
        );
        log::info!(
            "API version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let (device, graphics_queue, transfer_queue) = Self::create_logical_device(
            &instance,
            physical_device,
            graphics_queue_family,
            transfer_queue_family,
            display.is_some(),
        )?;

        let surface_loader = display.map(|_| khr::Surface::new(&entry, &instance));
        let dynamic_rendering = khr::DynamicRendering::new(&instance, &device);
        let extended_dynamic_state = ext::ExtendedDynamicState::new(&instance, &device);

        Ok(Arc::new(Self {
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            transfer_queue: transfer_queue_family.zip(transfer_queue),
            surface_loader,
            dynamic_rendering,
            extended_dynamic_state,
            debug_utils,
            properties,
            memory_properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        app_name: &str,
        enable_validation: bool,
        display: Option<RawDisplayHandle>,
    ) -> Result<ash::Instance, RenderError> {
        let app_name_cstr = CString::new(app_name).map_err(|_| RenderError::InvalidParameters)?;
        let engine_name = c"renderer-core";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions = Vec::new();

        if enable_validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        // Surface extensions are platform-specific; the window system
        // reports the required set through its display handle.
        if let Some(display) = display {
            let surface_extensions = ash_window::enumerate_required_extensions(display)
                .map_err(|e| map_vk(e, "enumerate_required_extensions"))?;
            extensions.extend_from_slice(surface_extensions);
        }

        let layer_names = if enable_validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe {
            entry
                .create_instance(&create_info, None)
                .map_err(|e| map_vk(e, "vkCreateInstance"))
        }
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT), RenderError> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(|e| map_vk(e, "vkCreateDebugUtilsMessengerEXT"))?
        };

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
    ) -> Result<(vk::PhysicalDevice, u32, Option<u32>), RenderError> {
        let devices = unsafe {
            instance
                .enumerate_physical_devices()
                .map_err(|e| map_vk(e, "vkEnumeratePhysicalDevices"))?
        };

        let mut best: Option<(vk::PhysicalDevice, u32, Option<u32>)> = None;
        let mut best_score = 0;

        for device in devices {
            let props = unsafe { instance.get_physical_device_properties(device) };
            let features = unsafe { instance.get_physical_device_features(device) };

            if !Self::check_device_features(&features) {
                continue;
            }

            let queue_families =
                unsafe { instance.get_physical_device_queue_family_properties(device) };

            let graphics_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, props)| props.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32);

            let Some(graphics_family) = graphics_family else {
                continue;
            };

            // A family with transfer but not graphics capability backs the
            // dedicated transfer queue when the hardware offers one.
            let transfer_family = queue_families
                .iter()
                .enumerate()
                .find(|(_, props)| {
                    props.queue_flags.contains(vk::QueueFlags::TRANSFER)
                        && !props.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                })
                .map(|(i, _)| i as u32);

            let score = match props.device_type {
                vk::PhysicalDeviceType::DISCRETE_GPU => 1000,
                vk::PhysicalDeviceType::INTEGRATED_GPU => 100,
                _ => 1,
            };

            if score > best_score {
                best_score = score;
                best = Some((device, graphics_family, transfer_family));
            }
        }

        best.ok_or_else(|| {
            log::error!("No suitable GPU found");
            RenderError::Unsupported
        })
    }

    fn check_device_features(features: &vk::PhysicalDeviceFeatures) -> bool {
        features.fill_mode_non_solid == vk::TRUE && features.sampler_anisotropy == vk::TRUE
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
        transfer_queue_family: Option<u32>,
        presentation: bool,
    ) -> Result<(ash::Device, vk::Queue, Option<vk::Queue>), RenderError> {
        let queue_priorities = [1.0];

        let mut queue_create_infos = vec![vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build()];

        if let Some(transfer_family) = transfer_queue_family {
            queue_create_infos.push(
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(transfer_family)
                    .queue_priorities(&queue_priorities)
                    .build(),
            );
        }

        let mut extensions = vec![
            khr::DynamicRendering::name().as_ptr(),
            ext::ExtendedDynamicState::name().as_ptr(),
        ];

        if presentation {
            extensions.push(khr::Swapchain::name().as_ptr());
        }

        let mut dynamic_rendering_features =
            vk::PhysicalDeviceDynamicRenderingFeatures::builder().dynamic_rendering(true);
        let mut extended_dynamic_state_features =
            vk::PhysicalDeviceExtendedDynamicStateFeaturesEXT::builder()
                .extended_dynamic_state(true);

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&REQUIRED_DEVICE_FEATURES)
            .push_next(&mut dynamic_rendering_features)
            .push_next(&mut extended_dynamic_state_features);

        let device = unsafe {
            instance
                .create_device(physical_device, &create_info, None)
                .map_err(|e| map_vk(e, "vkCreateDevice"))?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let transfer_queue =
            transfer_queue_family.map(|family| unsafe { device.get_device_queue(family, 0) });

        if transfer_queue.is_some() {
            log::debug!("Using dedicated transfer queue");
        }

        Ok((device, graphics_queue, transfer_queue))
    }

    // =========================================================================
    // Factory surface
    // =========================================================================

    /// Creates a buffer with bound device memory.
    pub fn create_buffer(
        self: &Arc<Self>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_type: vk::MemoryPropertyFlags,
        sharing_mode: vk::SharingMode,
    ) -> Result<Buffer, RenderError> {
        Buffer::create(self, size, usage, memory_type, sharing_mode)
    }

    /// Creates a 2D image with bound device-local memory and a view.
    pub fn create_image(
        self: &Arc<Self>,
        width: u32,
        height: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        aspect_mask: vk::ImageAspectFlags,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image, RenderError> {
        Image::create(self, width, height, format, tiling, aspect_mask, usage)
    }

    /// Creates a command pool bound to the requested queue.
    pub fn create_command_pool(
        self: &Arc<Self>,
        queue_type: QueueType,
    ) -> Result<CommandPool, RenderError> {
        CommandPool::create(self, queue_type)
    }

    /// Creates a single ready-to-record command buffer bound to the
    /// requested queue. Without a dedicated transfer queue, transfer
    /// buffers fall back to the graphics queue.
    pub fn create_command_buffer(
        self: &Arc<Self>,
        queue_type: QueueType,
    ) -> Result<CommandBuffer, RenderError> {
        self.create_command_pool(queue_type)?.allocate()
    }

    /// Creates an on-screen render target for the given shell window:
    /// queries the surface, builds the swap-set and depth buffer,
    /// allocates per-frame sync primitives and transitions every swap
    /// image to a presentable layout.
    pub fn create_surface_target(
        self: &Arc<Self>,
        shell: Box<dyn Shell>,
        config: &Config,
    ) -> Result<SurfaceTarget, RenderError> {
        let Some(surface_loader) = self.surface_loader.as_ref() else {
            log::error!("Device was created without presentation support");
            return Err(RenderError::Unsupported);
        };

        let display = shell
            .display_handle()
            .map_err(|_| RenderError::Unsupported)?
            .as_raw();
        let window = shell
            .window_handle()
            .map_err(|_| RenderError::Unsupported)?
            .as_raw();

        let surface = unsafe {
            ash_window::create_surface(&self.entry, &self.instance, display, window, None)
                .map_err(|e| map_vk(e, "create_platform_surface"))?
        };

        SurfaceTarget::create(
            self,
            shell,
            surface,
            config.graphics.swapchain_depth,
            config.preferred_present_mode(),
            config.graphics.acquire_timeout_ms * 1_000_000,
        )
        .map_err(|e| {
            unsafe { surface_loader.destroy_surface(surface, None) };
            e
        })
    }

    /// Creates a stereo render target over compositor-owned image sets.
    pub fn create_stereo_target(
        self: &Arc<Self>,
        compositor: Box<dyn Compositor>,
        set: StereoImageSet,
    ) -> Result<StereoTarget, RenderError> {
        StereoTarget::create(compositor, set)
    }

    /// Creates an empty pipeline handle bound to the target's color
    /// format, for the shader subsystem to fill in.
    pub fn create_pipeline(self: &Arc<Self>, target: &dyn RenderTarget) -> Pipeline {
        Pipeline::create(self, target)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.limits
    }

    /// Family and queue backing the given queue type; transfer silently
    /// degrades to the graphics queue when no dedicated family exists.
    pub(crate) fn queue_for(&self, queue_type: QueueType) -> (u32, vk::Queue) {
        match queue_type {
            QueueType::Graphics => (self.graphics_queue_family, self.graphics_queue),
            QueueType::Transfer => self
                .transfer_queue
                .unwrap_or((self.graphics_queue_family, self.graphics_queue)),
        }
    }

    pub(crate) fn surface_loader(&self) -> Option<&khr::Surface> {
        self.surface_loader.as_ref()
    }

    pub(crate) fn dynamic_rendering(&self) -> &khr::DynamicRendering {
        &self.dynamic_rendering
    }

    pub(crate) fn extended_dynamic_state(&self) -> &ext::ExtendedDynamicState {
        &self.extended_dynamic_state
    }

    /// Finds a memory type satisfying both the resource's requirements and
    /// the requested properties.
    pub(crate) fn memory_type_index(
        &self,
        type_bits: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<u32, RenderError> {
        for i in 0..self.memory_properties.memory_type_count {
            let has_type = (type_bits & (1 << i)) != 0;
            let has_properties = self.memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);

            if has_type && has_properties {
                return Ok(i);
            }
        }

        log::error!("No memory type satisfies {:?}", properties);
        Err(RenderError::Unsupported)
    }

    pub(crate) fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
    ) -> Result<vk::ImageView, RenderError> {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.device
                .create_image_view(&create_info, None)
                .map_err(|e| map_vk(e, "vkCreateImageView"))
        }
    }

    /// Waits for the device to go idle. The only way to flush all
    /// outstanding GPU work; used by target recreation and teardown.
    pub fn wait_idle(&self) -> Result<(), RenderError> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| map_vk(e, "vkDeviceWaitIdle"))
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        log::info!("Destroying device...");

        let _ = self.wait_idle();

        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

// Validation layer messages routed into the log
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}

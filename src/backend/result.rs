// Result taxonomy for the submission/presentation layer
//
// Hard failures are a closed error set that callers can match on.
// Suboptimal is deliberately not an error: it travels through the
// outcome enums so frame loops can keep rendering and schedule a
// recreate instead of unwinding.

use ash::vk;
use thiserror::Error;

/// Hard failure codes surfaced by every operation in this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The object was not in the correct state for the requested operation.
    #[error("object was in the wrong state for the requested operation")]
    InvalidState,

    /// The given parameters were malformed.
    #[error("the given parameters were malformed")]
    InvalidParameters,

    /// The system ran out of memory on the host.
    #[error("out of host memory")]
    OutOfHostMemory,

    /// The system ran out of memory on the device.
    #[error("out of device memory")]
    OutOfDeviceMemory,

    /// The device was lost. Requires full device teardown and recreation.
    #[error("the device was lost")]
    DeviceLost,

    /// The surface was lost. Requires target teardown and recreation.
    #[error("the surface was lost")]
    SurfaceLost,

    /// The platform, driver or hardware cannot satisfy the request.
    #[error("unsupported platform, driver or hardware")]
    Unsupported,
}

/// Outcome of acquiring the next presentable image.
///
/// `Suboptimal` carries no image: the presentation engine reported the
/// swap-set out of date (or acquisition timed out on a stalled surface)
/// and the caller should recreate the target before rendering again.
#[derive(Debug)]
pub enum AcquireOutcome {
    Ready(super::target::AcquiredImage),
    Suboptimal,
}

/// Outcome of presenting the last acquired image.
///
/// `Suboptimal` means the image was queued and the frame counter advanced,
/// but the target no longer matches the surface and should be recreated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Complete,
    Suboptimal,
}

/// Outcome of a full acquire/submit/present cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The frame was submitted and presented.
    Complete,
    /// The frame was skipped or presented suboptimally; recreate the target.
    Suboptimal,
}

/// Maps a native result onto the taxonomy.
///
/// Codes outside the taxonomy are programming-contract failures (driver or
/// API misuse) and abort the process; masking them would hide the misuse.
pub(crate) fn map_vk(result: vk::Result, call: &'static str) -> RenderError {
    match result {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => RenderError::OutOfHostMemory,
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => RenderError::OutOfDeviceMemory,
        vk::Result::ERROR_DEVICE_LOST => RenderError::DeviceLost,
        vk::Result::ERROR_SURFACE_LOST_KHR => RenderError::SurfaceLost,

        // Environment conditions rather than misuse: the driver, layer or
        // window system cannot satisfy the request.
        vk::Result::ERROR_INITIALIZATION_FAILED
        | vk::Result::ERROR_INCOMPATIBLE_DRIVER
        | vk::Result::ERROR_LAYER_NOT_PRESENT
        | vk::Result::ERROR_EXTENSION_NOT_PRESENT
        | vk::Result::ERROR_FEATURE_NOT_PRESENT
        | vk::Result::ERROR_FORMAT_NOT_SUPPORTED
        | vk::Result::ERROR_NATIVE_WINDOW_IN_USE_KHR => RenderError::Unsupported,

        other => panic!("{call} failed with unexpected {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_memory_and_loss_codes() {
        assert_eq!(
            map_vk(vk::Result::ERROR_OUT_OF_HOST_MEMORY, "test"),
            RenderError::OutOfHostMemory
        );
        assert_eq!(
            map_vk(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, "test"),
            RenderError::OutOfDeviceMemory
        );
        assert_eq!(map_vk(vk::Result::ERROR_DEVICE_LOST, "test"), RenderError::DeviceLost);
        assert_eq!(
            map_vk(vk::Result::ERROR_SURFACE_LOST_KHR, "test"),
            RenderError::SurfaceLost
        );
    }

    #[test]
    fn maps_environment_codes_to_unsupported() {
        assert_eq!(
            map_vk(vk::Result::ERROR_INCOMPATIBLE_DRIVER, "test"),
            RenderError::Unsupported
        );
        assert_eq!(
            map_vk(vk::Result::ERROR_EXTENSION_NOT_PRESENT, "test"),
            RenderError::Unsupported
        );
    }

    #[test]
    #[should_panic(expected = "vkTest failed")]
    fn panics_on_out_of_taxonomy_codes() {
        map_vk(vk::Result::ERROR_FRAGMENTED_POOL, "vkTest");
    }
}

// Windowing-side interface
//
// The whole surface the core consumes from the window system: raw
// display/window handles for platform surface creation, plus the current
// drawable extent for swap-set (re)builds when the surface reports none.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A presentable window supplied by the shell. Any winit-style window
/// type that exposes raw handles satisfies the supertraits; implementors
/// add the drawable-extent query.
pub trait Shell: HasDisplayHandle + HasWindowHandle {
    /// Current drawable size in pixels. Zero-sized extents (minimized
    /// windows) must be filtered by the frame loop before acquire/present.
    fn drawable_extent(&self) -> vk::Extent2D;
}

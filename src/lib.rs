//! GPU command-submission and frame-presentation layer.
//!
//! [`Device`] owns the queues and creates everything else. Each frame a
//! [`RenderTarget`] yields an acquired image, the caller records into a
//! [`CommandBuffer`], and submission gates on the image's sync handles
//! before presenting:
//!
//! ```no_run
//! use renderer_core::{Config, Device, QueueType};
//!
//! let config = Config::load();
//! let device = Device::new("demo", &config)?;
//!
//! let mut commands = device.create_command_buffer(QueueType::Graphics)?;
//! commands.begin()?;
//! // ... write commands ...
//! commands.end()?;
//! commands.submit()?;
//! # Ok::<(), renderer_core::RenderError>(())
//! ```
//!
//! Single-threaded by contract: CPU/GPU concurrency is mediated entirely
//! through fences and semaphores, never through internal locks.

mod backend;
pub mod config;
pub mod shell;

pub use backend::{
    AcquireOutcome, AcquiredImage, Buffer, Command, CommandBuffer, CommandPool, Compositor,
    Device, FrameSyncHandles, Image, Pipeline, PresentOutcome, QueueType, RecordState,
    RenderError, RenderTarget, StereoImageSet, StereoTarget, SubmitOutcome, SurfaceTarget,
    DEPTH_FORMAT,
};
pub use config::Config;
pub use shell::Shell;

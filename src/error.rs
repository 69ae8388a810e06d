// Error taxonomy for the renderer
//
// Every fallible construction step returns one of these instead of
// panicking or collapsing the reason into an Option. All startup errors
// are fatal: main prints them and exits non-zero.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error("failed to create Vulkan instance: {0}")]
    InstanceCreate(#[source] vk::Result),

    #[error("no Vulkan-capable device found")]
    NoSuitableDevice,

    #[error("no queue family with compute capability")]
    NoComputeQueue,

    #[error("no queue family can present to this surface")]
    NoPresentQueue,

    #[error("preferred surface format (B8G8R8A8_UNORM / SRGB_NONLINEAR) not supported")]
    UnsupportedFormat,

    #[error("concurrent image sharing between queue families {compute} and {present} is unimplemented")]
    UnimplementedSharingMode { compute: u32, present: u32 },

    #[error("no memory type matches mask {type_mask:#010x} with the requested property flags")]
    NoSuitableMemoryType { type_mask: u32 },

    #[error("kernel binary not found at {path:?}: {source}")]
    KernelFileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create window: {0}")]
    WindowCreate(#[from] winit::error::OsError),

    // Catch-all for raw API failures outside the taxonomy above
    #[error("Vulkan call failed: {0}")]
    Vk(#[from] vk::Result),
}

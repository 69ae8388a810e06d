// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Startup-only construction: every resource here is built once and torn
// down in reverse order at shutdown

pub mod commands;
pub mod device;
pub mod pipeline;
pub mod resources;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;

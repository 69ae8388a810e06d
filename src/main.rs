// GPU compute raytracer
//
// Bootstraps a Vulkan compute-driven presentation loop:
//
// 1. Pick a GPU, build the logical device and its compute/present queues
// 2. Build the surface, swapchain and per-image views
// 3. Allocate the work image, state buffer and descriptor set
// 4. Build the compute pipeline from the SPIR-V kernel on disk
// 5. Pre-record one command buffer per swapchain image
//    (barrier -> dispatch -> barrier -> blit -> barrier)
// 6. Loop: acquire -> submit -> present until close or Escape
//
// Everything is created once at startup and destroyed in reverse order at
// shutdown; there is no swapchain recreation and no multi-frame pipelining.

mod backend;
mod config;
mod error;

use anyhow::Result;
use ash::vk;
use backend::commands;
use backend::pipeline::{load_kernel_binary, ComputePipeline};
use backend::resources::{DescriptorResources, StateBuffer, WorkImage};
use backend::sync::FrameSemaphore;
use backend::{Swapchain, VulkanDevice};
use config::Config;
use error::RendererError;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    let config = Config::load();

    init_logging();
    log::info!("Starting GPU raytracer");
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Startup failures surface here as a non-zero exit
    if let Some(err) = app.startup_error.take() {
        return Err(err.into());
    }

    Ok(())
}

fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.init();
}

/// Steady-state loop phase. Stopping is entered on a close request or
/// Escape; the device is waited idle before any resource is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// Main application struct holding all Vulkan resources.
///
/// Resources are torn down explicitly in Drop, in reverse creation order;
/// the Option fields exist because winit hands us the window after
/// construction.
pub struct App {
    config: Config,

    // Window
    window: Option<Arc<Window>>,

    // Vulkan core (creation order: device -> swapchain -> resources ->
    // pipeline -> commands -> semaphore)
    device: Option<Arc<VulkanDevice>>,
    swapchain: Option<Swapchain>,
    work_image: Option<WorkImage>,
    state_buffer: Option<StateBuffer>,
    descriptors: Option<DescriptorResources>,
    pipeline: Option<ComputePipeline>,
    command_pool: Option<vk::CommandPool>,
    /// One pre-recorded command buffer per swapchain image, same indexing
    command_buffers: Vec<vk::CommandBuffer>,
    frame_semaphore: Option<FrameSemaphore>,

    loop_state: LoopState,
    startup_error: Option<RendererError>,

    // Pre-allocated to avoid per-frame heap allocations
    wait_stages: [vk::PipelineStageFlags; 1],

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    pub fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            window: None,
            device: None,
            swapchain: None,
            work_image: None,
            state_buffer: None,
            descriptors: None,
            pipeline: None,
            command_pool: None,
            command_buffers: Vec::new(),
            frame_semaphore: None,
            loop_state: LoopState::Running,
            startup_error: None,
            wait_stages: [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT],
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    /// Initialize all Vulkan resources, in dependency order.
    fn init_vulkan(&mut self, window: Arc<Window>) -> Result<(), RendererError> {
        log::info!("Initializing Vulkan...");

        let enable_validation = cfg!(debug_assertions) && self.config.debug.validation_layers;
        let device = VulkanDevice::new(&window, enable_validation)?;

        let swapchain = Swapchain::new(
            device.clone(),
            self.config.window.width,
            self.config.window.height,
        )?;
        let extent = swapchain.extent;

        let work_image = WorkImage::new(device.clone(), extent)?;

        // One vec4 of accumulated radiance per pixel
        let state_size = u64::from(extent.width) * u64::from(extent.height) * 16;
        let state_buffer = StateBuffer::new(device.clone(), state_size)?;

        let descriptors = DescriptorResources::new(device.clone(), &work_image, &state_buffer)?;

        let code = load_kernel_binary(Path::new(&self.config.kernel.path))?;
        let pipeline = ComputePipeline::new(device.clone(), descriptors.layout, &code)?;

        let command_pool = commands::create_command_pool(&device)?;
        let command_buffers = commands::record_command_buffers(
            &device,
            command_pool,
            &swapchain,
            &pipeline,
            descriptors.set,
            &work_image,
            self.config.kernel.rays_per_pixel,
        )?;

        let frame_semaphore = FrameSemaphore::new(&device)?;

        self.device = Some(device);
        self.swapchain = Some(swapchain);
        self.work_image = Some(work_image);
        self.state_buffer = Some(state_buffer);
        self.descriptors = Some(descriptors);
        self.pipeline = Some(pipeline);
        self.command_pool = Some(command_pool);
        self.command_buffers = command_buffers;
        self.frame_semaphore = Some(frame_semaphore);

        log::info!("Vulkan initialized successfully!");
        Ok(())
    }

    /// One acquire -> submit -> present cycle.
    ///
    /// The acquire is the only blocking call; submission and presentation
    /// return once enqueued. The compute submission waits on the acquire
    /// semaphore; the present call issues no wait semaphores and relies on
    /// same-queue submission order (compute == present in the supported
    /// configuration).
    fn render_frame(&mut self) -> Result<(), RendererError> {
        let (Some(device), Some(swapchain), Some(semaphore)) = (
            self.device.as_ref(),
            self.swapchain.as_ref(),
            self.frame_semaphore.as_ref(),
        ) else {
            return Ok(());
        };

        let image_index = swapchain.acquire_next_image(semaphore.image_available)?;

        let wait_semaphores = [semaphore.image_available];
        let command_buffers = [self.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers);

        unsafe {
            device.device.queue_submit(
                device.compute_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )?;
        }

        swapchain.present(device.present_queue, image_index, &[])?;

        Ok(())
    }

    /// Stop the loop: wait for in-flight GPU work, then let the event loop
    /// exit. Resources are released afterwards in Drop.
    fn begin_shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.loop_state != LoopState::Running {
            return;
        }
        self.loop_state = LoopState::Stopping;

        if let Some(ref device) = self.device {
            let _ = device.wait_idle();
        }

        event_loop.exit();
        self.loop_state = LoopState::Stopped;
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        if now.duration_since(self.last_fps_update).as_secs_f32() >= 1.0 {
            let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.startup_error = Some(RendererError::WindowCreate(e));
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_vulkan(window.clone()) {
            log::error!("Failed to initialize Vulkan: {}", e);
            self.startup_error = Some(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.begin_shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if self.loop_state != LoopState::Running {
                    return;
                }
                if let Err(e) = self.render_frame() {
                    // No runtime recovery path: an out-of-date or lost
                    // swapchain ends the loop
                    log::error!("Render error: {}", e);
                    self.begin_shutdown(event_loop);
                } else {
                    self.update_fps();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() {
                    if let PhysicalKey::Code(KeyCode::Escape) = event.physical_key {
                        log::info!("ESC pressed, exiting...");
                        self.begin_shutdown(event_loop);
                    }
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws: the loop runs as fast as presentation
    /// allows.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.loop_state != LoopState::Running {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Some(ref device) = self.device {
            // Wait for GPU to finish before destroying anything
            let _ = device.wait_idle();

            // Destroy in reverse order of creation
            if let Some(semaphore) = self.frame_semaphore.take() {
                semaphore.destroy(&device.device);
            }

            if let Some(pool) = self.command_pool.take() {
                // Also frees the command buffers
                unsafe { device.device.destroy_command_pool(pool, None) };
                self.command_buffers.clear();
            }

            self.pipeline = None;
            self.descriptors = None;
            self.state_buffer = None;
            self.work_image = None;
            self.swapchain = None;
        }

        // Device (with surface and instance) is dropped last via the Arc
        self.device = None;

        log::info!("Cleanup complete");
    }
}

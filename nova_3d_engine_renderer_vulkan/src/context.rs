//! GpuContext - device construction and shared GPU state
//!
//! The context is built once at startup and passed (via `Arc`) into every
//! component constructor. Resources keep the context alive, so the device
//! and instance are destroyed strictly after the last resource.

use std::ffi::CString;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use ash::vk::Handle;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use nova_3d_engine::nova3d::render::RendererConfig;
use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::renderer::{CommandsId, FenceId, FrameDevice, SemaphoreId};
use nova_3d_engine::{engine_err, engine_error, engine_info};

/// Surface handles produced during device construction.
///
/// The surface participates in queue-family selection, then passes into the
/// swapchain, which owns and destroys it.
pub struct SurfaceBundle {
    pub(crate) surface: vk::SurfaceKHR,
    pub(crate) loader: ash::khr::surface::Instance,
}

/// Shared GPU context for all Vulkan components.
///
/// Owns the entry, instance, logical device, and queues; implements the
/// core crate's `FrameDevice` seam over `vkFence`/`vkSemaphore`/
/// `vkQueueSubmit`.
pub struct GpuContext {
    /// Vulkan entry (kept alive for loader function pointers)
    _entry: ash::Entry,
    /// Vulkan instance
    pub(crate) instance: ash::Instance,
    /// Physical device
    pub(crate) physical_device: vk::PhysicalDevice,
    /// Logical device
    pub(crate) device: ash::Device,

    /// Graphics queue
    pub(crate) graphics_queue: vk::Queue,
    pub(crate) graphics_queue_family: u32,
    /// Present queue (may be the same as graphics)
    pub(crate) present_queue: vk::Queue,

    /// Device limits (uniform alignment, anisotropy bounds, ...)
    pub(crate) limits: vk::PhysicalDeviceLimits,

    #[cfg(feature = "vulkan-validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl GpuContext {
    /// Create the GPU context and the window surface.
    ///
    /// # Arguments
    ///
    /// * `window` - Window providing display and window handles
    /// * `config` - Renderer configuration
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        config: &RendererConfig,
    ) -> Result<(Arc<Self>, SurfaceBundle)> {
        unsafe {
            // Create Vulkan Entry
            let entry = ash::Entry::load().map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to load Vulkan library: {:?}", e);
                Error::InitializationFailed(format!("Failed to load Vulkan library: {:?}", e))
            })?;

            // Application Info
            let app_name = CString::new(config.app_name.as_str()).map_err(|e| {
                Error::ConfigurationError(format!("Invalid application name: {}", e))
            })?;
            let app_info = vk::ApplicationInfo::default()
                .application_name(&app_name)
                .application_version(vk::make_api_version(
                    0,
                    config.app_version.0,
                    config.app_version.1,
                    config.app_version.2,
                ))
                .engine_name(c"Nova3D")
                .engine_version(vk::make_api_version(0, 0, 1, 0))
                .api_version(vk::API_VERSION_1_3);

            // Get required extensions
            let display_handle = window.display_handle().map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to get display handle: {}", e);
                Error::InitializationFailed(format!("Failed to get display handle: {}", e))
            })?;
            #[allow(unused_mut)]
            let mut extension_names =
                ash_window::enumerate_required_extensions(display_handle.as_raw())
                    .map_err(|e| {
                        engine_error!(
                            "nova3d::vulkan",
                            "Failed to get required extensions: {}",
                            e
                        );
                        Error::InitializationFailed(format!(
                            "Failed to get required extensions: {}",
                            e
                        ))
                    })?
                    .to_vec();

            #[cfg(feature = "vulkan-validation")]
            if config.enable_validation {
                extension_names.push(ash::ext::debug_utils::NAME.as_ptr());
            }

            // Validation layers
            #[cfg(feature = "vulkan-validation")]
            let layer_names = if config.enable_validation {
                vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
            } else {
                vec![]
            };
            #[cfg(not(feature = "vulkan-validation"))]
            let layer_names: Vec<*const std::ffi::c_char> = vec![];

            let create_info = vk::InstanceCreateInfo::default()
                .application_info(&app_info)
                .enabled_layer_names(&layer_names)
                .enabled_extension_names(&extension_names);

            let instance = entry.create_instance(&create_info, None).map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to create Vulkan instance: {:?}", e);
                Error::InitializationFailed(format!("Failed to create instance: {:?}", e))
            })?;

            // Setup debug messenger if validation is enabled
            #[cfg(feature = "vulkan-validation")]
            let debug_messenger = if config.enable_validation {
                Some(crate::debug::create_messenger(&entry, &instance)?)
            } else {
                None
            };

            // Create Surface
            let window_handle = window.window_handle().map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to get window handle: {}", e);
                Error::InitializationFailed(format!("Failed to get window handle: {}", e))
            })?;
            let surface = ash_window::create_surface(
                &entry,
                &instance,
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to create surface: {:?}", e);
                Error::InitializationFailed(format!("Failed to create surface: {:?}", e))
            })?;

            let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);

            // Pick Physical Device
            let physical_devices = instance.enumerate_physical_devices().map_err(|e| {
                engine_error!(
                    "nova3d::vulkan",
                    "Failed to enumerate physical devices: {:?}",
                    e
                );
                Error::InitializationFailed(format!(
                    "Failed to enumerate physical devices: {:?}",
                    e
                ))
            })?;

            let physical_device = physical_devices.into_iter().next().ok_or_else(|| {
                engine_error!("nova3d::vulkan", "No Vulkan-capable GPU found");
                Error::InitializationFailed("No Vulkan-capable GPU found".to_string())
            })?;

            // Find Queue Families
            let queue_families =
                instance.get_physical_device_queue_family_properties(physical_device);

            let graphics_family_index = queue_families
                .iter()
                .enumerate()
                .find(|(_, qf)| qf.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|(i, _)| i as u32)
                .ok_or_else(|| {
                    engine_error!("nova3d::vulkan", "No graphics queue family found");
                    Error::InitializationFailed("No graphics queue family found".to_string())
                })?;

            let present_family_index = (0..queue_families.len() as u32)
                .find(|&i| {
                    surface_loader
                        .get_physical_device_surface_support(physical_device, i, surface)
                        .unwrap_or(false)
                })
                .ok_or_else(|| {
                    engine_error!("nova3d::vulkan", "No present queue family found");
                    Error::InitializationFailed("No present queue family found".to_string())
                })?;

            // Create Logical Device
            let queue_priorities = [1.0];
            let queue_create_infos = if graphics_family_index == present_family_index {
                vec![vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(graphics_family_index)
                    .queue_priorities(&queue_priorities)]
            } else {
                vec![
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(graphics_family_index)
                        .queue_priorities(&queue_priorities),
                    vk::DeviceQueueCreateInfo::default()
                        .queue_family_index(present_family_index)
                        .queue_priorities(&queue_priorities),
                ]
            };

            let device_extension_names = vec![ash::khr::swapchain::NAME.as_ptr()];

            let device_features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

            let device_create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&device_extension_names)
                .enabled_features(&device_features);

            let device = instance
                .create_device(physical_device, &device_create_info, None)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to create logical device: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create device: {:?}", e))
                })?;

            let graphics_queue = device.get_device_queue(graphics_family_index, 0);
            let present_queue = device.get_device_queue(present_family_index, 0);

            let limits = instance
                .get_physical_device_properties(physical_device)
                .limits;

            engine_info!(
                "nova3d::vulkan",
                "GPU context created (graphics family {}, present family {})",
                graphics_family_index,
                present_family_index
            );

            Ok((
                Arc::new(Self {
                    _entry: entry,
                    instance,
                    physical_device,
                    device,
                    graphics_queue,
                    graphics_queue_family: graphics_family_index,
                    present_queue,
                    limits,
                    #[cfg(feature = "vulkan-validation")]
                    debug_messenger,
                }),
                SurfaceBundle {
                    surface,
                    loader: surface_loader,
                },
            ))
        }
    }

    /// The logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Device limits as reported by the physical device.
    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.limits
    }

    /// Block until the device is idle. Used around shutdown and
    /// swapchain-dependent rebuilds.
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device
                .device_wait_idle()
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to wait idle: {:?}", e))
        }
    }
}

impl FrameDevice for GpuContext {
    fn create_fence(&self, signaled: bool) -> Result<FenceId> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        unsafe {
            let fence = self
                .device
                .create_fence(&create_info, None)
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to create fence: {:?}", e))?;
            Ok(FenceId::from_raw(fence.as_raw()))
        }
    }

    fn create_semaphore(&self) -> Result<SemaphoreId> {
        let create_info = vk::SemaphoreCreateInfo::default();
        unsafe {
            let semaphore = self
                .device
                .create_semaphore(&create_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to create semaphore: {:?}", e)
                })?;
            Ok(SemaphoreId::from_raw(semaphore.as_raw()))
        }
    }

    fn destroy_fence(&self, fence: FenceId) {
        unsafe {
            self.device
                .destroy_fence(vk::Fence::from_raw(fence.as_raw()), None);
        }
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        unsafe {
            self.device
                .destroy_semaphore(vk::Semaphore::from_raw(semaphore.as_raw()), None);
        }
    }

    fn wait_for_fence(&self, fence: FenceId, timeout: Duration) -> Result<()> {
        let fence = vk::Fence::from_raw(fence.as_raw());
        unsafe {
            match self
                .device
                .wait_for_fences(&[fence], true, timeout.as_nanos() as u64)
            {
                Ok(()) => Ok(()),
                Err(vk::Result::TIMEOUT) => Err(Error::DeviceLost(format!(
                    "fence wait exceeded {:?}",
                    timeout
                ))),
                Err(vk::Result::ERROR_DEVICE_LOST) => {
                    Err(Error::DeviceLost("device lost during fence wait".to_string()))
                }
                Err(e) => Err(engine_err!(
                    "nova3d::vulkan",
                    "Failed to wait for fence: {:?}",
                    e
                )),
            }
        }
    }

    fn reset_fence(&self, fence: FenceId) -> Result<()> {
        let fence = vk::Fence::from_raw(fence.as_raw());
        unsafe {
            self.device
                .reset_fences(&[fence])
                .map_err(|e| engine_err!("nova3d::vulkan", "Failed to reset fence: {:?}", e))
        }
    }

    fn submit(
        &self,
        commands: CommandsId,
        wait: SemaphoreId,
        signal: SemaphoreId,
        fence: FenceId,
    ) -> Result<()> {
        let command_buffers = [vk::CommandBuffer::from_raw(commands.as_raw())];
        let wait_semaphores = [vk::Semaphore::from_raw(wait.as_raw())];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [vk::Semaphore::from_raw(signal.as_raw())];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            match self.device.queue_submit(
                self.graphics_queue,
                &[submit_info],
                vk::Fence::from_raw(fence.as_raw()),
            ) {
                Ok(()) => Ok(()),
                // A failed submission leaves the queue state unknowable.
                Err(e) => Err(Error::DeviceLost(format!(
                    "queue submit failed: {:?}",
                    e
                ))),
            }
        }
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            // Every resource holds an Arc to this context, so by the time
            // this runs the device has no live children.
            self.device.device_wait_idle().ok();

            #[cfg(feature = "vulkan-validation")]
            if let Some((loader, messenger)) = self.debug_messenger.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }

            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

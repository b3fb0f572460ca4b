//! Swapchain - presentation engine implementation
//!
//! Owns the surface and the presentable images. Synchronization primitives
//! belong to the FrameSynchronizer; this type only consumes the semaphore
//! handles it is given for acquire and present.

use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::renderer::{PresentationEngine, SemaphoreId, GPU_WAIT_TIMEOUT};
use nova_3d_engine::{engine_debug, engine_err, engine_error, engine_warn};

use crate::context::{GpuContext, SurfaceBundle};

/// Vulkan swapchain implementation.
///
/// Handles image acquisition, presentation, and recreation on resize;
/// completely separated from rendering logic.
pub struct Swapchain {
    ctx: Arc<GpuContext>,

    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,

    swapchain: vk::SwapchainKHR,
    loader: ash::khr::swapchain::Device,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Create a new swapchain over the given surface.
    pub fn new(ctx: Arc<GpuContext>, surface: SurfaceBundle) -> Result<Self> {
        unsafe {
            let SurfaceBundle {
                surface,
                loader: surface_loader,
            } = surface;

            // Query surface capabilities
            let surface_capabilities = surface_loader
                .get_physical_device_surface_capabilities(ctx.physical_device, surface)
                .map_err(|e| {
                    engine_error!(
                        "nova3d::vulkan",
                        "Failed to get surface capabilities: {:?}",
                        e
                    );
                    Error::InitializationFailed(format!(
                        "Failed to get surface capabilities: {:?}",
                        e
                    ))
                })?;

            // Choose surface format
            let surface_formats = surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, surface)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to query surface formats: {:?}", e);
                    Error::InitializationFailed(format!("Failed to get surface formats: {:?}", e))
                })?;

            let surface_format = surface_formats
                .iter()
                .find(|f| {
                    f.format == vk::Format::B8G8R8A8_SRGB || f.format == vk::Format::R8G8B8A8_SRGB
                })
                .unwrap_or(&surface_formats[0]);

            let extent = surface_capabilities.current_extent;

            let desired_images = surface_capabilities.min_image_count.max(3);
            let image_count = if surface_capabilities.max_image_count > 0 {
                desired_images.min(surface_capabilities.max_image_count)
            } else {
                desired_images
            };

            let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(surface)
                .min_image_count(image_count)
                .image_format(surface_format.format)
                .image_color_space(surface_format.color_space)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(surface_capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(vk::PresentModeKHR::FIFO);

            let loader = ash::khr::swapchain::Device::new(&ctx.instance, &ctx.device);
            let swapchain = loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| {
                    engine_error!("nova3d::vulkan", "Failed to create swapchain: {:?}", e);
                    Error::InitializationFailed(format!("Failed to create swapchain: {:?}", e))
                })?;

            let images = loader.get_swapchain_images(swapchain).map_err(|e| {
                engine_error!("nova3d::vulkan", "Failed to get swapchain images: {:?}", e);
                Error::InitializationFailed(format!("Failed to get swapchain images: {:?}", e))
            })?;

            let image_views =
                Self::create_image_views(&ctx, &images, surface_format.format)?;

            engine_debug!(
                "nova3d::vulkan",
                "Created swapchain: {} images, {:?}, {}x{}",
                images.len(),
                surface_format.format,
                extent.width,
                extent.height
            );

            Ok(Self {
                ctx,
                surface,
                surface_loader,
                swapchain,
                loader,
                images,
                image_views,
                format: surface_format.format,
                extent,
            })
        }
    }

    fn create_image_views(
        ctx: &GpuContext,
        images: &[vk::Image],
        format: vk::Format,
    ) -> Result<Vec<vk::ImageView>> {
        unsafe {
            images
                .iter()
                .map(|&image| {
                    let create_info = vk::ImageViewCreateInfo::default()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(format)
                        .components(vk::ComponentMapping {
                            r: vk::ComponentSwizzle::IDENTITY,
                            g: vk::ComponentSwizzle::IDENTITY,
                            b: vk::ComponentSwizzle::IDENTITY,
                            a: vk::ComponentSwizzle::IDENTITY,
                        })
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        });
                    ctx.device.create_image_view(&create_info, None)
                })
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| {
                    engine_error!(
                        "nova3d::vulkan",
                        "Failed to create swapchain image views: {:?}",
                        e
                    );
                    Error::InitializationFailed(format!("Failed to create image views: {:?}", e))
                })
        }
    }

    /// Surface format of the presentable images.
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn width(&self) -> u32 {
        self.extent.width
    }

    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// Per-image views, for framebuffer construction.
    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    /// Recreate the swapchain after the surface was invalidated or resized.
    ///
    /// `width`/`height` are the fallback extent for platforms that leave
    /// the choice to the application.
    pub fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        unsafe {
            // Nothing may be rendering to the old images.
            self.ctx.device.device_wait_idle().map_err(|e| {
                engine_err!(
                    "nova3d::vulkan",
                    "Failed to wait idle before swapchain recreate: {:?}",
                    e
                )
            })?;

            for image_view in &self.image_views {
                self.ctx.device.destroy_image_view(*image_view, None);
            }
            self.image_views.clear();

            let surface_capabilities = self
                .surface_loader
                .get_physical_device_surface_capabilities(self.ctx.physical_device, self.surface)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to get surface capabilities during recreate: {:?}",
                        e
                    )
                })?;

            let extent = if surface_capabilities.current_extent.width != u32::MAX {
                surface_capabilities.current_extent
            } else {
                vk::Extent2D {
                    width: width.clamp(
                        surface_capabilities.min_image_extent.width,
                        surface_capabilities.max_image_extent.width,
                    ),
                    height: height.clamp(
                        surface_capabilities.min_image_extent.height,
                        surface_capabilities.max_image_extent.height,
                    ),
                }
            };

            let image_count = surface_capabilities.min_image_count + 1;
            let image_count = if surface_capabilities.max_image_count > 0 {
                image_count.min(surface_capabilities.max_image_count)
            } else {
                image_count
            };

            let old_swapchain = self.swapchain;
            let swapchain_create_info = vk::SwapchainCreateInfoKHR::default()
                .surface(self.surface)
                .min_image_count(image_count)
                .image_format(self.format)
                .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
                .image_extent(extent)
                .image_array_layers(1)
                .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
                .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                .pre_transform(surface_capabilities.current_transform)
                .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                .present_mode(vk::PresentModeKHR::FIFO)
                .clipped(true)
                .old_swapchain(old_swapchain);

            let swapchain = self
                .loader
                .create_swapchain(&swapchain_create_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to recreate swapchain: {:?}", e)
                })?;

            self.loader.destroy_swapchain(old_swapchain, None);
            self.swapchain = swapchain;
            self.extent = extent;

            self.images = self.loader.get_swapchain_images(swapchain).map_err(|e| {
                engine_err!(
                    "nova3d::vulkan",
                    "Failed to get swapchain images during recreate: {:?}",
                    e
                )
            })?;

            self.image_views = Self::create_image_views(&self.ctx, &self.images, self.format)?;

            engine_debug!(
                "nova3d::vulkan",
                "Recreated swapchain: {} images, {}x{}",
                self.images.len(),
                extent.width,
                extent.height
            );

            Ok(())
        }
    }
}

impl PresentationEngine for Swapchain {
    fn acquire_image(&mut self, signal: SemaphoreId) -> Result<u32> {
        unsafe {
            match self.loader.acquire_next_image(
                self.swapchain,
                GPU_WAIT_TIMEOUT.as_nanos() as u64,
                vk::Semaphore::from_raw(signal.as_raw()),
                vk::Fence::null(),
            ) {
                // A suboptimal acquire still hands over the image; present
                // will report the stale surface once the frame completes.
                Ok((image_index, _suboptimal)) => Ok(image_index),
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    engine_warn!("nova3d::vulkan", "Swapchain out of date during acquire");
                    Err(Error::SurfaceInvalidated)
                }
                Err(vk::Result::TIMEOUT) => Err(Error::DeviceLost(format!(
                    "image acquire exceeded {:?}",
                    GPU_WAIT_TIMEOUT
                ))),
                Err(e) => Err(engine_err!(
                    "nova3d::vulkan",
                    "Failed to acquire next swapchain image: {:?}",
                    e
                )),
            }
        }
    }

    fn present(&mut self, image_index: u32, wait: SemaphoreId) -> Result<()> {
        unsafe {
            let swapchains = [self.swapchain];
            let image_indices = [image_index];
            let wait_semaphores = [vk::Semaphore::from_raw(wait.as_raw())];

            let present_info = vk::PresentInfoKHR::default()
                .wait_semaphores(&wait_semaphores)
                .swapchains(&swapchains)
                .image_indices(&image_indices);

            match self
                .loader
                .queue_present(self.ctx.present_queue, &present_info)
            {
                Ok(false) => Ok(()),
                // Suboptimal still presented, but the surface no longer
                // matches; rebuild before the next frame.
                Ok(true) => {
                    engine_warn!("nova3d::vulkan", "Swapchain suboptimal during present");
                    Err(Error::SurfaceInvalidated)
                }
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                    engine_warn!("nova3d::vulkan", "Swapchain out of date during present");
                    Err(Error::SurfaceInvalidated)
                }
                Err(e) => Err(engine_err!(
                    "nova3d::vulkan",
                    "Failed to present swapchain image: {:?}",
                    e
                )),
            }
        }
    }

    fn image_count(&self) -> usize {
        self.images.len()
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.device_wait_idle().ok();

            for &image_view in &self.image_views {
                self.ctx.device.destroy_image_view(image_view, None);
            }
            self.loader.destroy_swapchain(self.swapchain, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

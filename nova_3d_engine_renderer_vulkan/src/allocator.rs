//! DeviceAllocator - device-memory suballocation for buffers and images
//!
//! Built on gpu-allocator: each resource is carved out of a larger device
//! memory pool rather than getting one OS allocation per resource. An
//! [`AllocatedBuffer`]/[`AllocatedImage`] owns its native handle and its
//! backing allocation together; `Drop` releases the handle first, then the
//! allocation, on every exit path.
//!
//! The interior `Mutex` serializes pool access. The baseline design has a
//! single producer thread; the lock is the prerequisite for ever adding
//! more.

use std::sync::{Arc, Mutex};

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

use nova_3d_engine::engine_error;
use nova_3d_engine::nova3d::{Error, Result};

use crate::context::GpuContext;

/// Memory class of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryClass {
    /// CPU-visible and persistently mapped; written by the CPU every frame
    /// (uniform slots)
    HostVisible,
    /// CPU-visible staging source for a one-shot copy into DeviceLocal
    /// memory; freed right after the upload
    Staging,
    /// GPU-only memory, never mapped (vertex/index buffers, images)
    DeviceLocal,
}

impl MemoryClass {
    fn location(self) -> MemoryLocation {
        match self {
            MemoryClass::HostVisible | MemoryClass::Staging => MemoryLocation::CpuToGpu,
            MemoryClass::DeviceLocal => MemoryLocation::GpuOnly,
        }
    }
}

/// Description of an image allocation.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub format: vk::Format,
    pub tiling: vk::ImageTiling,
    pub usage: vk::ImageUsageFlags,
    pub memory_class: MemoryClass,
}

/// Round `size` up to the next multiple of a power-of-two `alignment`.
pub(crate) fn align_up(size: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (size + alignment - 1) & !(alignment - 1)
}

/// Device-memory allocator shared by every resource-creating component.
pub struct DeviceAllocator {
    // Declared before `ctx` so the pools are returned while the device is
    // still alive.
    inner: Mutex<Allocator>,
    ctx: Arc<GpuContext>,
}

impl DeviceAllocator {
    /// Create the allocator over the context's device.
    pub fn new(ctx: Arc<GpuContext>) -> Result<Arc<Self>> {
        let inner = Allocator::new(&AllocatorCreateDesc {
            instance: ctx.instance.clone(),
            device: ctx.device.clone(),
            physical_device: ctx.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| {
            engine_error!("nova3d::vulkan", "Failed to create GPU allocator: {:?}", e);
            Error::InitializationFailed(format!("Failed to create allocator: {:?}", e))
        })?;

        Ok(Arc::new(Self {
            inner: Mutex::new(inner),
            ctx,
        }))
    }

    pub(crate) fn context(&self) -> &Arc<GpuContext> {
        &self.ctx
    }

    /// Allocate a buffer of `size` bytes.
    ///
    /// Failure is `Error::OutOfDeviceMemory` and is fatal to the operation
    /// in progress; callers must not retry without freeing something first.
    pub fn allocate_buffer(
        self: &Arc<Self>,
        size: u64,
        usage: vk::BufferUsageFlags,
        memory_class: MemoryClass,
    ) -> Result<AllocatedBuffer> {
        unsafe {
            let buffer_create_info = vk::BufferCreateInfo::default()
                .size(size)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);

            let buffer = self
                .ctx
                .device
                .create_buffer(&buffer_create_info, None)
                .map_err(|e| {
                    Error::BackendError(format!("Failed to create buffer: {:?}", e))
                })?;

            let requirements = self.ctx.device.get_buffer_memory_requirements(buffer);

            let allocation = match self.inner.lock().unwrap().allocate(&AllocationCreateDesc {
                name: "buffer",
                requirements,
                location: memory_class.location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.ctx.device.destroy_buffer(buffer, None);
                    engine_error!(
                        "nova3d::vulkan",
                        "Buffer allocation of {} bytes failed: {:?}",
                        size,
                        e
                    );
                    return Err(Error::OutOfDeviceMemory {
                        what: format!("buffer of {} bytes", size),
                    });
                }
            };

            if let Err(e) = self.ctx.device.bind_buffer_memory(
                buffer,
                allocation.memory(),
                allocation.offset(),
            ) {
                self.inner.lock().unwrap().free(allocation).ok();
                self.ctx.device.destroy_buffer(buffer, None);
                return Err(Error::BackendError(format!(
                    "Failed to bind buffer memory: {:?}",
                    e
                )));
            }

            Ok(AllocatedBuffer {
                allocator: Arc::clone(self),
                buffer,
                allocation: Some(allocation),
                size,
            })
        }
    }

    /// Allocate a 2D image.
    pub fn allocate_image(self: &Arc<Self>, desc: &ImageDesc) -> Result<AllocatedImage> {
        unsafe {
            let image_create_info = vk::ImageCreateInfo::default()
                .image_type(vk::ImageType::TYPE_2D)
                .format(desc.format)
                .extent(vk::Extent3D {
                    width: desc.width,
                    height: desc.height,
                    depth: 1,
                })
                .mip_levels(desc.mip_levels)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(desc.tiling)
                .usage(desc.usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);

            let image = self
                .ctx
                .device
                .create_image(&image_create_info, None)
                .map_err(|e| Error::BackendError(format!("Failed to create image: {:?}", e)))?;

            let requirements = self.ctx.device.get_image_memory_requirements(image);

            let allocation = match self.inner.lock().unwrap().allocate(&AllocationCreateDesc {
                name: "image",
                requirements,
                location: desc.memory_class.location(),
                linear: desc.tiling == vk::ImageTiling::LINEAR,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            }) {
                Ok(allocation) => allocation,
                Err(e) => {
                    self.ctx.device.destroy_image(image, None);
                    engine_error!(
                        "nova3d::vulkan",
                        "Image allocation {}x{} failed: {:?}",
                        desc.width,
                        desc.height,
                        e
                    );
                    return Err(Error::OutOfDeviceMemory {
                        what: format!("{}x{} image", desc.width, desc.height),
                    });
                }
            };

            if let Err(e) = self.ctx.device.bind_image_memory(
                image,
                allocation.memory(),
                allocation.offset(),
            ) {
                self.inner.lock().unwrap().free(allocation).ok();
                self.ctx.device.destroy_image(image, None);
                return Err(Error::BackendError(format!(
                    "Failed to bind image memory: {:?}",
                    e
                )));
            }

            Ok(AllocatedImage {
                allocator: Arc::clone(self),
                image,
                allocation: Some(allocation),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: desc.mip_levels,
            })
        }
    }

    /// Round a uniform-allocation size up to the device's minimum
    /// uniform-buffer offset alignment.
    ///
    /// Must be applied to every dynamically indexed uniform allocation
    /// before use; descriptor binding offsets are invalid otherwise on
    /// hardware whose alignment exceeds the requested size.
    pub fn pad_uniform_alignment(&self, size: u64) -> u64 {
        let alignment = self.ctx.limits.min_uniform_buffer_offset_alignment.max(1);
        align_up(size, alignment)
    }

    fn free_allocation(&self, allocation: Allocation) {
        // Don't panic if the lock is poisoned - the resource handle is
        // already destroyed and the allocation must still be returned.
        if let Ok(mut inner) = self.inner.lock() {
            inner.free(allocation).ok();
        }
    }
}

/// A buffer paired with its backing device-memory allocation.
///
/// Exclusively owned by whichever component created it; dropping releases
/// the buffer handle first, then the allocation.
pub struct AllocatedBuffer {
    allocator: Arc<DeviceAllocator>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: u64,
}

impl AllocatedBuffer {
    /// The native buffer handle.
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Allocated size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Copy `data` into the mapped allocation at `offset`.
    ///
    /// Only valid for `HostVisible`/`Staging` buffers. The caller is
    /// responsible for not writing a region the GPU may still be reading;
    /// per-frame buffers rely on the frame fence discipline for this.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        if offset + data.len() as u64 > self.size {
            return Err(Error::ConfigurationError(format!(
                "buffer write of {} bytes at offset {} exceeds size {}",
                data.len(),
                offset,
                self.size
            )));
        }

        let allocation = self.allocation.as_ref().ok_or_else(|| {
            Error::BackendError("buffer has no backing allocation".to_string())
        })?;
        let mapped = allocation.mapped_ptr().ok_or_else(|| {
            Error::BackendError("buffer is not CPU-accessible".to_string())
        })?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                (mapped.as_ptr() as *mut u8).add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            self.allocator.ctx.device.destroy_buffer(self.buffer, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free_allocation(allocation);
        }
    }
}

/// An image paired with its backing device-memory allocation.
pub struct AllocatedImage {
    allocator: Arc<DeviceAllocator>,
    image: vk::Image,
    allocation: Option<Allocation>,
    width: u32,
    height: u32,
    format: vk::Format,
    mip_levels: u32,
}

impl AllocatedImage {
    /// The native image handle.
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Create a 2D view over all mip levels of the image.
    ///
    /// The caller owns the returned view and must destroy it before the
    /// image is dropped.
    pub fn create_view(&self, aspect_mask: vk::ImageAspectFlags) -> Result<vk::ImageView> {
        let create_info = vk::ImageViewCreateInfo::default()
            .image(self.image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(self.format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level: 0,
                level_count: self.mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            });

        unsafe {
            self.allocator
                .ctx
                .device
                .create_image_view(&create_info, None)
                .map_err(|e| Error::BackendError(format!("Failed to create image view: {:?}", e)))
        }
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.allocator.ctx.device.destroy_image(self.image, None);
        }
        if let Some(allocation) = self.allocation.take() {
            self.allocator.free_allocation(allocation);
        }
    }
}

#[cfg(test)]
#[path = "allocator_tests.rs"]
mod tests;

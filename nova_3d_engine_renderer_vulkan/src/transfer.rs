//! TransferExecutor - blocking one-shot transfer command sequences
//!
//! Transfers (vertex/index uploads, image layout transitions, mipmap
//! generation) happen at resource-creation time, outside the steady-state
//! frame loop, so they are deliberately synchronous: `end_transfer` submits
//! and blocks until the GPU confirms completion. Each call is a full round
//! trip; batching several copies into one recorded sequence before calling
//! `end_transfer` is the caller's only performance lever.

use std::sync::Arc;

use ash::vk;

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::renderer::GPU_WAIT_TIMEOUT;
use nova_3d_engine::{engine_err, engine_trace};

use crate::allocator::{AllocatedBuffer, AllocatedImage, DeviceAllocator, ImageDesc, MemoryClass};
use crate::context::GpuContext;

/// A one-shot command sequence being recorded.
pub struct TransferCommands {
    buffer: vk::CommandBuffer,
}

/// Pipeline barrier parameters for a supported image layout transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransitionMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for a layout transition, or a configuration error for an
/// unsupported pair.
pub(crate) fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<TransitionMasks> {
    match (old_layout, new_layout) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Ok(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
            })
        }
        (old, new) => Err(Error::ConfigurationError(format!(
            "unsupported image layout transition {:?} -> {:?}",
            old, new
        ))),
    }
}

/// Executor for short-lived, one-shot transfer command sequences.
pub struct TransferExecutor {
    ctx: Arc<GpuContext>,
    pool: vk::CommandPool,
}

impl TransferExecutor {
    /// Create the executor with its transient command pool.
    pub fn new(ctx: Arc<GpuContext>) -> Result<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(ctx.graphics_queue_family)
            .flags(
                vk::CommandPoolCreateFlags::TRANSIENT
                    | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            );

        let pool = unsafe {
            ctx.device
                .create_command_pool(&pool_create_info, None)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to create transfer command pool: {:?}",
                        e
                    )
                })?
        };

        Ok(Self { ctx, pool })
    }

    /// Allocate and begin recording a one-shot command sequence.
    pub fn begin_transfer(&self) -> Result<TransferCommands> {
        unsafe {
            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(self.pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            let buffer = self
                .ctx
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to allocate transfer command buffer: {:?}",
                        e
                    )
                })?[0];

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

            self.ctx
                .device
                .begin_command_buffer(buffer, &begin_info)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to begin transfer command buffer: {:?}",
                        e
                    )
                })?;

            Ok(TransferCommands { buffer })
        }
    }

    /// Stop recording, submit, and block until the GPU reports completion.
    ///
    /// The wait is bounded; exceeding the bound is treated as device loss.
    /// The command resource is released before returning, on every path.
    pub fn end_transfer(&self, commands: TransferCommands) -> Result<()> {
        let cb = commands.buffer;
        unsafe {
            self.ctx.device.end_command_buffer(cb).map_err(|e| {
                engine_err!(
                    "nova3d::vulkan",
                    "Failed to end transfer command buffer: {:?}",
                    e
                )
            })?;

            let fence_info = vk::FenceCreateInfo::default();
            let fence = self
                .ctx
                .device
                .create_fence(&fence_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to create transfer fence: {:?}", e)
                })?;

            let result = (|| {
                let command_buffers = [cb];
                let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

                self.ctx
                    .device
                    .queue_submit(self.ctx.graphics_queue, &[submit_info], fence)
                    .map_err(|e| Error::DeviceLost(format!("transfer submit failed: {:?}", e)))?;

                match self.ctx.device.wait_for_fences(
                    &[fence],
                    true,
                    GPU_WAIT_TIMEOUT.as_nanos() as u64,
                ) {
                    Ok(()) => Ok(()),
                    Err(vk::Result::TIMEOUT) => Err(Error::DeviceLost(format!(
                        "transfer wait exceeded {:?}",
                        GPU_WAIT_TIMEOUT
                    ))),
                    Err(e) => Err(Error::DeviceLost(format!(
                        "transfer fence wait failed: {:?}",
                        e
                    ))),
                }
            })();

            self.ctx.device.destroy_fence(fence, None);
            self.ctx.device.free_command_buffers(self.pool, &[cb]);

            result
        }
    }

    /// Record a buffer-to-buffer copy of `size` bytes.
    pub fn record_copy_buffer(
        &self,
        commands: &TransferCommands,
        src: &AllocatedBuffer,
        dst: &AllocatedBuffer,
        size: u64,
    ) {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.ctx.device.cmd_copy_buffer(
                commands.buffer,
                src.handle(),
                dst.handle(),
                &[region],
            );
        }
    }

    /// Copy between buffers in a single blocking round trip.
    pub fn copy_buffer(
        &self,
        src: &AllocatedBuffer,
        dst: &AllocatedBuffer,
        size: u64,
    ) -> Result<()> {
        let commands = self.begin_transfer()?;
        self.record_copy_buffer(&commands, src, dst, size);
        self.end_transfer(commands)
    }

    /// Record a full-extent copy from a staging buffer into mip 0 of an
    /// image. The image must be in `TRANSFER_DST_OPTIMAL`.
    pub fn record_copy_buffer_to_image(
        &self,
        commands: &TransferCommands,
        src: &AllocatedBuffer,
        dst: &AllocatedImage,
    ) {
        let region = vk::BufferImageCopy {
            buffer_offset: 0,
            buffer_row_length: 0,
            buffer_image_height: 0,
            image_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            },
            image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
            image_extent: vk::Extent3D {
                width: dst.width(),
                height: dst.height(),
                depth: 1,
            },
        };
        unsafe {
            self.ctx.device.cmd_copy_buffer_to_image(
                commands.buffer,
                src.handle(),
                dst.handle(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    /// Record a layout transition over all mip levels of an image.
    ///
    /// Only the transitions a texture upload needs are supported; any other
    /// pair is a configuration error.
    pub fn record_transition_image_layout(
        &self,
        commands: &TransferCommands,
        image: &AllocatedImage,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<()> {
        let masks = transition_masks(old_layout, new_layout)?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: image.mip_levels(),
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                commands.buffer,
                masks.src_stage,
                masks.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        Ok(())
    }

    /// Generate the full mip chain of an image by blitting each level from
    /// the previous one, leaving every level in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// The image must be in `TRANSFER_DST_OPTIMAL` on all levels, and its
    /// format must support linear-filtered blits under optimal tiling.
    pub fn generate_mipmaps(&self, image: &AllocatedImage) -> Result<()> {
        let format_properties = unsafe {
            self.ctx
                .instance
                .get_physical_device_format_properties(self.ctx.physical_device, image.format())
        };
        if !format_properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(Error::ConfigurationError(format!(
                "format {:?} does not support linear blitting for mipmap generation",
                image.format()
            )));
        }

        let commands = self.begin_transfer()?;
        let cb = commands.buffer;

        let mut barrier = vk::ImageMemoryBarrier::default()
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image.handle())
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let mut mip_width = image.width() as i32;
        let mut mip_height = image.height() as i32;

        unsafe {
            for level in 1..image.mip_levels() {
                // Source level: TRANSFER_DST -> TRANSFER_SRC once its data
                // is complete.
                barrier.subresource_range.base_mip_level = level - 1;
                barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
                barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
                barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
                barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;

                self.ctx.device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );

                let next_width = (mip_width / 2).max(1);
                let next_height = (mip_height / 2).max(1);

                let blit = vk::ImageBlit {
                    src_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level - 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    src_offsets: [
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: mip_width,
                            y: mip_height,
                            z: 1,
                        },
                    ],
                    dst_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: level,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    dst_offsets: [
                        vk::Offset3D { x: 0, y: 0, z: 0 },
                        vk::Offset3D {
                            x: next_width,
                            y: next_height,
                            z: 1,
                        },
                    ],
                };

                self.ctx.device.cmd_blit_image(
                    cb,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    image.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[blit],
                    vk::Filter::LINEAR,
                );

                // Source level is final: TRANSFER_SRC -> SHADER_READ_ONLY.
                barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
                barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
                barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
                barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;

                self.ctx.device.cmd_pipeline_barrier(
                    cb,
                    vk::PipelineStageFlags::TRANSFER,
                    vk::PipelineStageFlags::FRAGMENT_SHADER,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &[barrier],
                );

                mip_width = next_width;
                mip_height = next_height;
            }

            // Last level was only ever a blit destination.
            barrier.subresource_range.base_mip_level = image.mip_levels() - 1;
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;

            self.ctx.device.cmd_pipeline_barrier(
                cb,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }

        self.end_transfer(commands)
    }

    /// Upload raw bytes into a new DeviceLocal buffer through a staging
    /// buffer. The staging buffer is freed when this returns.
    pub fn upload_buffer(
        &self,
        allocator: &Arc<DeviceAllocator>,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<AllocatedBuffer> {
        let size = data.len() as u64;
        let staging = allocator.allocate_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryClass::Staging,
        )?;
        staging.write(0, data)?;

        let buffer = allocator.allocate_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryClass::DeviceLocal,
        )?;

        self.copy_buffer(&staging, &buffer, size)?;
        engine_trace!("nova3d::vulkan", "uploaded {} bytes to device-local buffer", size);
        Ok(buffer)
    }

    /// Upload raw pixel data into a new sampled image with a full mip
    /// chain, leaving the image in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_image(
        &self,
        allocator: &Arc<DeviceAllocator>,
        pixels: &[u8],
        width: u32,
        height: u32,
        format: vk::Format,
    ) -> Result<AllocatedImage> {
        let mip_levels = (32 - width.max(height).leading_zeros()).max(1);

        let staging = allocator.allocate_buffer(
            pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryClass::Staging,
        )?;
        staging.write(0, pixels)?;

        let image = allocator.allocate_image(&ImageDesc {
            width,
            height,
            mip_levels,
            format,
            tiling: vk::ImageTiling::OPTIMAL,
            usage: vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            memory_class: MemoryClass::DeviceLocal,
        })?;

        let commands = self.begin_transfer()?;
        self.record_transition_image_layout(
            &commands,
            &image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )?;
        self.record_copy_buffer_to_image(&commands, &staging, &image);
        if mip_levels == 1 {
            self.record_transition_image_layout(
                &commands,
                &image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }
        self.end_transfer(commands)?;

        if mip_levels > 1 {
            self.generate_mipmaps(&image)?;
        }

        Ok(image)
    }
}

impl Drop for TransferExecutor {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_command_pool(self.pool, None);
        }
    }
}

#[cfg(test)]
#[path = "transfer_tests.rs"]
mod tests;

//! VulkanRenderer - the frame orchestrator
//!
//! Composes the GPU context, allocator, transfer executor, descriptor
//! allocator, swapchain, and frame synchronizer into the per-frame cycle:
//! wait for a free frame slot, acquire a presentable image, record draw
//! commands against it, submit with the correct wait/signal dependencies,
//! and request presentation. Recording happens strictly between acquisition
//! and submission; everything a recorded sequence references is owned per
//! slot and protected by the slot's fence.

use std::mem;
use std::sync::Arc;

use ash::vk;
use ash::vk::Handle;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use nova_3d_engine::frame::{run_frame, FrameContext, FrameOutcome, FrameRecorder, FrameSynchronizer};
use nova_3d_engine::nova3d::render::{
    BindingSlot, CameraData, CategoryDesc, RendererConfig, ResourceKind, ShaderStageFlags,
};
use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::renderer::{CommandsId, PresentationEngine};
use nova_3d_engine::{engine_bail, engine_err, engine_info};

use crate::allocator::{AllocatedBuffer, AllocatedImage, DeviceAllocator, ImageDesc, MemoryClass};
use crate::context::GpuContext;
use crate::descriptor::{BindingResource, BindingWrite, CategoryId, DescriptorAllocator};
use crate::pipeline::{GraphicsPipeline, PipelineDesc, RenderPass};
use crate::scene::{Drawable, DrawableId, Material, MaterialId, Scene};
use crate::swapchain::Swapchain;
use crate::transfer::TransferExecutor;

/// Sets available per frame slot's per-frame category each frame.
const PER_FRAME_SET_BUDGET: u32 = 8;
/// Long-lived material sets available over the renderer's lifetime.
const MATERIAL_SET_BUDGET: u32 = 256;

/// Transient resources owned by one frame slot.
///
/// Touched by the CPU only after the slot's fence has signaled.
struct FrameResources {
    camera_buffer: AllocatedBuffer,
}

/// The Vulkan frame orchestrator.
pub struct VulkanRenderer {
    sync: FrameSynchronizer,
    swapchain: Swapchain,
    render_pass: RenderPass,
    pipeline: GraphicsPipeline,
    framebuffers: Vec<vk::Framebuffer>,

    depth_image: AllocatedImage,
    depth_view: vk::ImageView,

    frames: Vec<FrameResources>,
    draw_command_pool: vk::CommandPool,
    draw_command_buffers: Vec<vk::CommandBuffer>,

    /// One per-frame category per slot, so resetting one slot's sets never
    /// touches sets another slot's submission may still be reading.
    per_frame_categories: Vec<CategoryId>,
    material_category: CategoryId,

    descriptors: DescriptorAllocator,
    transfer: TransferExecutor,
    allocator: Arc<DeviceAllocator>,
    scene: Scene,
    camera: CameraData,

    window_size: (u32, u32),
    pending_resize: bool,

    // Declared last: dropped after every component above has released its
    // own Arc.
    context: Arc<GpuContext>,
}

impl VulkanRenderer {
    /// Create the renderer over a window.
    ///
    /// # Arguments
    ///
    /// * `window` - Window providing display and window handles
    /// * `config` - Renderer configuration (frame count N is fixed here)
    /// * `pipeline_desc` - Compiled shader bytecode for the render pipeline
    pub fn new<W: HasDisplayHandle + HasWindowHandle>(
        window: &W,
        config: RendererConfig,
        pipeline_desc: &PipelineDesc<'_>,
    ) -> Result<Self> {
        if config.frames_in_flight == 0 {
            return Err(Error::ConfigurationError(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let (context, surface) = GpuContext::new(window, &config)?;
        let allocator = DeviceAllocator::new(Arc::clone(&context))?;
        let transfer = TransferExecutor::new(Arc::clone(&context))?;
        let swapchain = Swapchain::new(Arc::clone(&context), surface)?;
        let render_pass = RenderPass::new(Arc::clone(&context), swapchain.format())?;

        let mut descriptors = DescriptorAllocator::new(Arc::clone(&context));

        // One fast-churning category per frame slot plus one long-lived
        // material tier; separate pools keep their lifecycles independent.
        let mut per_frame_categories = Vec::with_capacity(config.frames_in_flight);
        for slot in 0..config.frames_in_flight {
            per_frame_categories.push(descriptors.create_category(&CategoryDesc {
                name: format!("frame[{}]", slot),
                bindings: vec![BindingSlot {
                    binding: 0,
                    kind: ResourceKind::UniformBuffer,
                    stages: ShaderStageFlags::VERTEX,
                }],
                max_sets: PER_FRAME_SET_BUDGET,
            })?);
        }
        let material_category = descriptors.create_category(&CategoryDesc {
            name: "material".to_string(),
            bindings: vec![BindingSlot {
                binding: 0,
                kind: ResourceKind::CombinedImageSampler,
                stages: ShaderStageFlags::FRAGMENT,
            }],
            max_sets: MATERIAL_SET_BUDGET,
        })?;

        // Identically defined per-slot layouts are compatible, so slot 0's
        // layout stands in for all of them in the pipeline layout.
        let set_layouts = [
            descriptors.layout(per_frame_categories[0])?,
            descriptors.layout(material_category)?,
        ];
        let pipeline = GraphicsPipeline::new(
            Arc::clone(&context),
            &render_pass,
            &set_layouts,
            pipeline_desc,
        )?;

        let (depth_image, depth_view) =
            create_depth_resources(&allocator, render_pass.depth_format(), swapchain.extent())?;
        let framebuffers = create_framebuffers(&context, &render_pass, &swapchain, depth_view)?;

        // Per-slot camera uniforms, padded so the slots could also be
        // packed into one dynamically indexed buffer.
        let camera_size = allocator.pad_uniform_alignment(mem::size_of::<CameraData>() as u64);
        let mut frames = Vec::with_capacity(config.frames_in_flight);
        for _ in 0..config.frames_in_flight {
            frames.push(FrameResources {
                camera_buffer: allocator.allocate_buffer(
                    camera_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryClass::HostVisible,
                )?,
            });
        }

        let pool_create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let draw_command_pool = unsafe {
            context
                .device
                .create_command_pool(&pool_create_info, None)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to create draw command pool: {:?}",
                        e
                    )
                })?
        };

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(draw_command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(config.frames_in_flight as u32);
        let draw_command_buffers = unsafe {
            context
                .device
                .allocate_command_buffers(&alloc_info)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to allocate draw command buffers: {:?}",
                        e
                    )
                })?
        };

        let sync = FrameSynchronizer::new(
            context.as_ref(),
            config.frames_in_flight,
            swapchain.image_count(),
        )?;

        let window_size = (swapchain.width(), swapchain.height());

        engine_info!(
            "nova3d::vulkan",
            "Renderer initialized: {} frames in flight, {} presentable images",
            config.frames_in_flight,
            swapchain.image_count()
        );

        Ok(Self {
            sync,
            swapchain,
            render_pass,
            pipeline,
            framebuffers,
            depth_image,
            depth_view,
            frames,
            draw_command_pool,
            draw_command_buffers,
            per_frame_categories,
            material_category,
            descriptors,
            transfer,
            allocator,
            scene: Scene::new(),
            camera: CameraData::default(),
            window_size,
            pending_resize: false,
            context,
        })
    }

    /// The scene resource set.
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Set the camera data uploaded at the start of every frame.
    pub fn set_camera(&mut self, camera: CameraData) {
        self.camera = camera;
    }

    /// Upload a texture and register it as a long-lived material.
    ///
    /// `pixels` is tightly packed RGBA8 data of `width * height` texels; a
    /// full mip chain is generated.
    pub fn create_material(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<MaterialId> {
        let image = self.transfer.upload_image(
            &self.allocator,
            pixels,
            width,
            height,
            vk::Format::R8G8B8A8_SRGB,
        )?;
        let view = image.create_view(vk::ImageAspectFlags::COLOR)?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(self.context.limits.max_sampler_anisotropy)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(image.mip_levels() as f32);
        let sampler = unsafe {
            match self.context.device.create_sampler(&sampler_info, None) {
                Ok(sampler) => sampler,
                Err(e) => {
                    self.context.device.destroy_image_view(view, None);
                    return Err(engine_err!(
                        "nova3d::vulkan",
                        "Failed to create sampler: {:?}",
                        e
                    ));
                }
            }
        };

        // Material sets live in their own pool; per-frame resets never
        // reach them.
        let set = match self.descriptors.allocate_sets(self.material_category, 1) {
            Ok(sets) => sets[0],
            Err(e) => {
                unsafe {
                    self.context.device.destroy_sampler(sampler, None);
                    self.context.device.destroy_image_view(view, None);
                }
                return Err(e);
            }
        };
        // Hand ownership to the material first so the view and sampler are
        // released on every path from here on.
        let material = Material::new(Arc::clone(&self.context), image, view, sampler, set);
        self.descriptors.write_bindings(
            self.material_category,
            set,
            &[BindingWrite {
                binding: 0,
                resource: BindingResource::CombinedImageSampler { view, sampler },
            }],
        )?;

        Ok(self.scene.add_material(material))
    }

    /// Upload raw mesh data and append a drawable to the scene.
    ///
    /// `vertex_data` and `index_data` are opaque byte buffers from the
    /// asset-loading collaborator; indices are u32.
    pub fn upload_mesh(
        &mut self,
        name: &str,
        vertex_data: &[u8],
        index_data: &[u8],
        index_count: u32,
        material: MaterialId,
    ) -> Result<DrawableId> {
        let vertex_buffer = self.transfer.upload_buffer(
            &self.allocator,
            vertex_data,
            vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let index_buffer = self.transfer.upload_buffer(
            &self.allocator,
            index_data,
            vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        self.scene.add_drawable(Drawable {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            index_count,
            material,
        })
    }

    /// Drive one frame cycle.
    pub fn draw_frame(&mut self) -> Result<FrameOutcome> {
        // A resize request from the windowing collaborator takes effect at
        // the next cycle boundary.
        if self.pending_resize {
            self.pending_resize = false;
            self.rebuild_surface()?;
            let image_count = self.swapchain.image_count();
            self.sync.rebuild_image_table(image_count);
            return Ok(FrameOutcome::SurfaceRebuilt);
        }

        let device = Arc::clone(&self.context);
        let mut recorder = RecordState {
            ctx: Arc::clone(&self.context),
            swapchain: &mut self.swapchain,
            render_pass: &self.render_pass,
            pipeline: &self.pipeline,
            framebuffers: &mut self.framebuffers,
            depth_image: &mut self.depth_image,
            depth_view: &mut self.depth_view,
            frames: &self.frames,
            draw_command_buffers: &self.draw_command_buffers,
            per_frame_categories: &self.per_frame_categories,
            descriptors: &mut self.descriptors,
            allocator: &self.allocator,
            scene: &self.scene,
            camera: self.camera,
            window_size: self.window_size,
        };

        run_frame(&mut self.sync, device.as_ref(), &mut recorder)
    }

    /// Repeat the per-frame cycle until `should_quit` reports true.
    pub fn run_frame_loop<F: FnMut() -> bool>(&mut self, mut should_quit: F) -> Result<()> {
        while !should_quit() {
            self.draw_frame()?;
        }
        self.context.wait_idle()
    }

    /// Callback for the windowing collaborator: the surface was resized and
    /// swapchain-dependent resources must be rebuilt.
    pub fn on_surface_resized(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.window_size = (width, height);
            self.pending_resize = true;
        }
    }

    fn rebuild_surface(&mut self) -> Result<()> {
        rebuild_swapchain_dependents(
            &self.context,
            &self.allocator,
            &mut self.swapchain,
            &self.render_pass,
            &mut self.depth_image,
            &mut self.depth_view,
            &mut self.framebuffers,
            self.window_size,
        )
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        unsafe {
            self.context.device.device_wait_idle().ok();

            self.sync.destroy(self.context.as_ref());

            for framebuffer in self.framebuffers.drain(..) {
                self.context.device.destroy_framebuffer(framebuffer, None);
            }
            self.context.device.destroy_image_view(self.depth_view, None);

            // Frees the per-slot draw command buffers with it.
            self.context
                .device
                .destroy_command_pool(self.draw_command_pool, None);
        }
    }
}

/// Borrowed view of the renderer used while a frame cycle runs; keeps the
/// synchronizer borrow disjoint from everything recording needs.
struct RecordState<'a> {
    ctx: Arc<GpuContext>,
    swapchain: &'a mut Swapchain,
    render_pass: &'a RenderPass,
    pipeline: &'a GraphicsPipeline,
    framebuffers: &'a mut Vec<vk::Framebuffer>,
    depth_image: &'a mut AllocatedImage,
    depth_view: &'a mut vk::ImageView,
    frames: &'a [FrameResources],
    draw_command_buffers: &'a [vk::CommandBuffer],
    per_frame_categories: &'a [CategoryId],
    descriptors: &'a mut DescriptorAllocator,
    allocator: &'a Arc<DeviceAllocator>,
    scene: &'a Scene,
    camera: CameraData,
    window_size: (u32, u32),
}

impl FrameRecorder for RecordState<'_> {
    type Presenter = Swapchain;

    fn presenter(&mut self) -> &mut Swapchain {
        self.swapchain
    }

    fn record_frame(&mut self, frame: &FrameContext) -> Result<CommandsId> {
        let slot = frame.frame_index;
        let image = frame.image_index as usize;
        if image >= self.framebuffers.len() {
            engine_bail!(
                "nova3d::vulkan",
                "acquired image {} has no framebuffer (count {})",
                image,
                self.framebuffers.len()
            );
        }

        // The slot's fence has signaled, so its previous frame's uniform
        // data and descriptor sets are no longer read by the GPU.
        let camera_buffer = &self.frames[slot].camera_buffer;
        camera_buffer.write(0, bytemuck::bytes_of(&self.camera))?;

        let category = self.per_frame_categories[slot];
        self.descriptors.reset_category(category)?;
        let frame_set = self.descriptors.allocate_sets(category, 1)?[0];
        self.descriptors.write_bindings(
            category,
            frame_set,
            &[BindingWrite {
                binding: 0,
                resource: BindingResource::UniformBuffer {
                    buffer: camera_buffer.handle(),
                    offset: 0,
                    range: mem::size_of::<CameraData>() as u64,
                },
            }],
        )?;

        let cb = self.draw_command_buffers[slot];
        let device = &self.ctx.device;
        let extent = self.swapchain.extent();

        unsafe {
            device
                .reset_command_buffer(cb, vk::CommandBufferResetFlags::empty())
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to reset command buffer: {:?}", e)
                })?;

            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cb, &begin_info).map_err(|e| {
                engine_err!("nova3d::vulkan", "Failed to begin command buffer: {:?}", e)
            })?;

            let clear_values = [
                vk::ClearValue {
                    color: vk::ClearColorValue {
                        float32: [0.0, 0.0, 0.0, 1.0],
                    },
                },
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                },
            ];

            let render_pass_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass.handle)
                .framebuffer(self.framebuffers[image])
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cb, &render_pass_info, vk::SubpassContents::INLINE);

            let viewport = vk::Viewport::default()
                .x(0.0)
                .y(0.0)
                .width(extent.width as f32)
                .height(extent.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);
            device.cmd_set_viewport(cb, 0, &[viewport]);

            let scissor = vk::Rect2D::default()
                .offset(vk::Offset2D { x: 0, y: 0 })
                .extent(extent);
            device.cmd_set_scissor(cb, 0, &[scissor]);

            device.cmd_bind_pipeline(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.pipeline,
            );

            // One indexed draw per drawable, in scene insertion order.
            for drawable in self.scene.drawables() {
                device.cmd_bind_vertex_buffers(
                    cb,
                    0,
                    &[drawable.vertex_buffer.handle()],
                    &[0],
                );
                device.cmd_bind_index_buffer(
                    cb,
                    drawable.index_buffer.handle(),
                    0,
                    vk::IndexType::UINT32,
                );

                let material_set = self.scene.material(drawable.material).descriptor_set;
                device.cmd_bind_descriptor_sets(
                    cb,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline.layout,
                    0,
                    &[frame_set, material_set],
                    &[],
                );

                device.cmd_draw_indexed(cb, drawable.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cb);
            device.end_command_buffer(cb).map_err(|e| {
                engine_err!("nova3d::vulkan", "Failed to end command buffer: {:?}", e)
            })?;
        }

        Ok(CommandsId::from_raw(cb.as_raw()))
    }

    fn rebuild_surface_resources(&mut self) -> Result<()> {
        rebuild_swapchain_dependents(
            &self.ctx,
            self.allocator,
            self.swapchain,
            self.render_pass,
            self.depth_image,
            self.depth_view,
            self.framebuffers,
            self.window_size,
        )
    }
}

/// Pick the view aspect for a depth format.
fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Create the depth image and its view for the current surface extent.
fn create_depth_resources(
    allocator: &Arc<DeviceAllocator>,
    format: vk::Format,
    extent: vk::Extent2D,
) -> Result<(AllocatedImage, vk::ImageView)> {
    let image = allocator.allocate_image(&ImageDesc {
        width: extent.width,
        height: extent.height,
        mip_levels: 1,
        format,
        tiling: vk::ImageTiling::OPTIMAL,
        usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        memory_class: MemoryClass::DeviceLocal,
    })?;
    let view = image.create_view(depth_aspect(format))?;
    Ok((image, view))
}

/// Create one framebuffer per presentable image (color + shared depth).
fn create_framebuffers(
    ctx: &Arc<GpuContext>,
    render_pass: &RenderPass,
    swapchain: &Swapchain,
    depth_view: vk::ImageView,
) -> Result<Vec<vk::Framebuffer>> {
    swapchain
        .image_views()
        .iter()
        .map(|&image_view| {
            let attachments = [image_view, depth_view];
            let framebuffer_info = vk::FramebufferCreateInfo::default()
                .render_pass(render_pass.handle)
                .attachments(&attachments)
                .width(swapchain.width())
                .height(swapchain.height())
                .layers(1);
            unsafe {
                ctx.device
                    .create_framebuffer(&framebuffer_info, None)
                    .map_err(|e| {
                        engine_err!("nova3d::vulkan", "Failed to create framebuffer: {:?}", e)
                    })
            }
        })
        .collect()
}

/// Rebuild everything that depends on the swapchain: the swapchain itself,
/// the depth target, and the framebuffers. The synchronizer's
/// image-ownership table is reset by the caller.
#[allow(clippy::too_many_arguments)]
fn rebuild_swapchain_dependents(
    ctx: &Arc<GpuContext>,
    allocator: &Arc<DeviceAllocator>,
    swapchain: &mut Swapchain,
    render_pass: &RenderPass,
    depth_image: &mut AllocatedImage,
    depth_view: &mut vk::ImageView,
    framebuffers: &mut Vec<vk::Framebuffer>,
    window_size: (u32, u32),
) -> Result<()> {
    // recreate() waits for the device to go idle first, so nothing below
    // is still referenced by in-flight work.
    swapchain.recreate(window_size.0, window_size.1)?;

    unsafe {
        for framebuffer in framebuffers.drain(..) {
            ctx.device.destroy_framebuffer(framebuffer, None);
        }
        ctx.device.destroy_image_view(*depth_view, None);
    }

    let (new_depth_image, new_depth_view) =
        create_depth_resources(allocator, render_pass.depth_format(), swapchain.extent())?;
    *depth_image = new_depth_image;
    *depth_view = new_depth_view;
    *framebuffers = create_framebuffers(ctx, render_pass, swapchain, new_depth_view)?;

    Ok(())
}

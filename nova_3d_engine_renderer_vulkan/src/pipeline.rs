//! Render pass and graphics pipeline construction
//!
//! Fixed-function configuration data: one color attachment (swapchain
//! format) plus a depth attachment, and a single graphics pipeline over the
//! engine vertex layout. Shader bytecode arrives from the caller; loading
//! it is outside this crate.

use std::mem;
use std::sync::Arc;

use ash::vk;

use nova_3d_engine::nova3d::render::Vertex;
use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::{engine_bail, engine_err};

use crate::context::GpuContext;

/// Depth formats in preference order.
const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Render pass with one color and one depth attachment.
pub struct RenderPass {
    ctx: Arc<GpuContext>,
    pub(crate) handle: vk::RenderPass,
    depth_format: vk::Format,
}

impl RenderPass {
    /// Create the pass for a given color (swapchain) format.
    pub fn new(ctx: Arc<GpuContext>, color_format: vk::Format) -> Result<Self> {
        let depth_format = Self::find_depth_format(&ctx)?;

        let attachments = [
            vk::AttachmentDescription::default()
                .format(color_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::AttachmentDescription::default()
                .format(depth_format)
                .samples(vk::SampleCountFlags::TYPE_1)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::DONT_CARE)
                .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                .initial_layout(vk::ImageLayout::UNDEFINED)
                .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL),
        ];

        let color_attachment_ref = vk::AttachmentReference::default()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let depth_attachment_ref = vk::AttachmentReference::default()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let subpass = vk::SubpassDescription::default()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(std::slice::from_ref(&color_attachment_ref))
            .depth_stencil_attachment(&depth_attachment_ref);

        let dependency = vk::SubpassDependency::default()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::empty())
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let render_pass_info = vk::RenderPassCreateInfo::default()
            .attachments(&attachments)
            .subpasses(std::slice::from_ref(&subpass))
            .dependencies(std::slice::from_ref(&dependency));

        let handle = unsafe {
            ctx.device
                .create_render_pass(&render_pass_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to create render pass: {:?}", e)
                })?
        };

        Ok(Self {
            ctx,
            handle,
            depth_format,
        })
    }

    /// The depth format the pass was built with.
    pub fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// First candidate format supporting depth-stencil attachment under
    /// optimal tiling.
    fn find_depth_format(ctx: &GpuContext) -> Result<vk::Format> {
        for format in DEPTH_FORMAT_CANDIDATES {
            let properties = unsafe {
                ctx.instance
                    .get_physical_device_format_properties(ctx.physical_device, format)
            };
            if properties
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            {
                return Ok(format);
            }
        }
        Err(Error::ConfigurationError(
            "no supported depth attachment format".to_string(),
        ))
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_render_pass(self.handle, None);
        }
    }
}

/// SPIR-V bytecode for the pipeline's two stages.
///
/// The binding layouts passed alongside must match what these modules were
/// compiled against; binding indices are positional.
pub struct PipelineDesc<'a> {
    pub vertex_spirv: &'a [u8],
    pub fragment_spirv: &'a [u8],
}

/// Graphics pipeline and its layout.
pub struct GraphicsPipeline {
    ctx: Arc<GpuContext>,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build the pipeline over the engine vertex layout.
    ///
    /// `set_layouts` are the descriptor set layouts in set-index order
    /// (set 0 = per-frame, set 1 = per-material).
    pub fn new(
        ctx: Arc<GpuContext>,
        render_pass: &RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
        desc: &PipelineDesc<'_>,
    ) -> Result<Self> {
        unsafe {
            let vertex_module = Self::create_shader_module(&ctx, desc.vertex_spirv)?;
            let fragment_module = match Self::create_shader_module(&ctx, desc.fragment_spirv) {
                Ok(module) => module,
                Err(e) => {
                    ctx.device.destroy_shader_module(vertex_module, None);
                    return Err(e);
                }
            };

            let result = Self::build(&ctx, render_pass, set_layouts, vertex_module, fragment_module);

            // Modules are compiled into the pipeline; they are not needed
            // past creation either way.
            ctx.device.destroy_shader_module(vertex_module, None);
            ctx.device.destroy_shader_module(fragment_module, None);

            let (pipeline, layout) = result?;
            Ok(Self {
                ctx,
                pipeline,
                layout,
            })
        }
    }

    fn build(
        ctx: &Arc<GpuContext>,
        render_pass: &RenderPass,
        set_layouts: &[vk::DescriptorSetLayout],
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> Result<(vk::Pipeline, vk::PipelineLayout)> {
        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(fragment_module)
                .name(c"main"),
        ];

        // Vertex input: one binding, the engine Vertex layout
        let vertex_bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: mem::size_of::<Vertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let vertex_attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Vertex, position) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Vertex, normal) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: mem::offset_of!(Vertex, color) as u32,
            },
            vk::VertexInputAttributeDescription {
                location: 3,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: mem::offset_of!(Vertex, tex_coord) as u32,
            },
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport state (dynamic)
        let viewports = [vk::Viewport::default()];
        let scissors = [vk::Rect2D::default()];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);

        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let layout_create_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(set_layouts);
        let layout = unsafe {
            ctx.device
                .create_pipeline_layout(&layout_create_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to create pipeline layout: {:?}", e)
                })?
        };

        let pipeline_create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass.handle)
            .subpass(0);

        let pipelines = unsafe {
            match ctx.device.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[pipeline_create_info],
                None,
            ) {
                Ok(pipelines) => pipelines,
                Err((_, e)) => {
                    ctx.device.destroy_pipeline_layout(layout, None);
                    return Err(engine_err!(
                        "nova3d::vulkan",
                        "Failed to create graphics pipeline: {:?}",
                        e
                    ));
                }
            }
        };

        Ok((pipelines[0], layout))
    }

    fn create_shader_module(ctx: &Arc<GpuContext>, spirv: &[u8]) -> Result<vk::ShaderModule> {
        if spirv.is_empty() || spirv.len() % 4 != 0 {
            engine_bail!(
                "nova3d::vulkan",
                "Shader bytecode length {} is not a non-zero multiple of 4",
                spirv.len()
            );
        }

        // Copy into u32 words; the input slice has no alignment guarantee.
        let words: Vec<u32> = spirv
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);
        unsafe {
            ctx.device
                .create_shader_module(&create_info, None)
                .map_err(|e| {
                    engine_err!("nova3d::vulkan", "Failed to create shader module: {:?}", e)
                })
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_pipeline(self.pipeline, None);
            self.ctx.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

// Render target description, graphics pipeline and pre-recorded commands
//
// Everything here is derived from the device profile and one swapchain
// generation, so it is built and destroyed as a single unit. The viewport
// is baked into the pipeline: a new extent means a new pipeline.

use ash::vk;
use std::ffi::CStr;

use super::device::DeviceProfile;
use super::shader::{create_shader_module, ShaderBlobs};
use super::swapchain::Swapchain;
use crate::error::{EngineResult, VkResultExt};

const ENTRY_POINT: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"main\0") };

/// Vertices come from the vertex shader; no buffers are bound
#[derive(Clone, Copy, Debug)]
pub struct DrawCall {
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl DrawCall {
    pub const TRIANGLE: DrawCall = DrawCall {
        vertex_count: 3,
        instance_count: 1,
    };
}

/// Multisample attachment resolved into the presentable image
pub fn create_render_pass(
    device: &ash::Device,
    format: vk::Format,
    samples: vk::SampleCountFlags,
) -> EngineResult<vk::RenderPass> {
    // Offscreen multisample target, never stored
    let msaa_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    // Swapchain image, written only by the resolve
    let present_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::DONT_CARE)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let resolve_refs = [vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .resolve_attachments(&resolve_refs)
        .build();

    // Color writes wait for the previous user of the image (presentation)
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        )
        .build();

    let attachments = [msaa_attachment, present_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.create_render_pass(&render_pass_info, None) }.op("vkCreateRenderPass")
}

pub fn create_pipeline_layout(device: &ash::Device) -> EngineResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    unsafe { device.create_pipeline_layout(&layout_info, None) }.op("vkCreatePipelineLayout")
}

/// Fixed-function triangle pipeline with a viewport matching `extent`
pub fn create_graphics_pipeline(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    samples: vk::SampleCountFlags,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> EngineResult<vk::Pipeline> {
    let shader_stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_shader)
            .name(ENTRY_POINT)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_shader)
            .name(ENTRY_POINT)
            .build(),
    ];

    // No vertex buffers
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    let viewports = [vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }];
    let scissors = [vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(&viewports)
        .scissors(&scissors);

    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(samples)
        .min_sample_shading(1.0);

    let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build()];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .logic_op(vk::LogicOp::COPY)
        .attachments(&color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, code)| code)
    .op("vkCreateGraphicsPipelines")?;

    Ok(pipelines[0])
}

/// One framebuffer per slot: multisample view first, presentable view second
pub fn create_framebuffers(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> EngineResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(swapchain.slots.len());

    for slot in &swapchain.slots {
        let attachments = [slot.msaa.view, slot.view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);

        match unsafe { device.create_framebuffer(&framebuffer_info, None) }
            .op("vkCreateFramebuffer")
        {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e);
            }
        }
    }

    Ok(framebuffers)
}

/// Record the pass once per framebuffer. The recordings may be pending on
/// the GPU while being submitted again, hence SIMULTANEOUS_USE.
pub fn record_command_buffers(
    device: &ash::Device,
    command_buffers: &[vk::CommandBuffer],
    framebuffers: &[vk::Framebuffer],
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
    draw: DrawCall,
) -> EngineResult<()> {
    let clear_values = [
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear_color,
            },
        },
    ];

    for (&cmd, &framebuffer) in command_buffers.iter().zip(framebuffers) {
        let begin_info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            device
                .begin_command_buffer(cmd, &begin_info)
                .op("vkBeginCommandBuffer")?;
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
            device.cmd_draw(cmd, draw.vertex_count, draw.instance_count, 0, 0);
            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).op("vkEndCommandBuffer")?;
        }
    }

    Ok(())
}

/// Everything derived from one swapchain generation besides the slots
#[derive(Debug)]
pub struct PipelineArtifacts {
    pub vertex_module: vk::ShaderModule,
    pub fragment_module: vk::ShaderModule,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub framebuffers: Vec<vk::Framebuffer>,
    /// Indexed by swapchain image index, like `framebuffers`
    pub command_buffers: Vec<vk::CommandBuffer>,
    command_pool: vk::CommandPool,
}

impl PipelineArtifacts {
    /// Build in creation order. On failure, whatever was created is
    /// destroyed again before the error is returned.
    pub fn build(
        device: &ash::Device,
        profile: &DeviceProfile,
        swapchain: &Swapchain,
        shaders: &ShaderBlobs,
        command_pool: vk::CommandPool,
        clear_color: [f32; 4],
    ) -> EngineResult<Self> {
        let mut artifacts = Self {
            vertex_module: vk::ShaderModule::null(),
            fragment_module: vk::ShaderModule::null(),
            render_pass: vk::RenderPass::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            command_pool,
        };

        match artifacts.populate(device, profile, swapchain, shaders, clear_color) {
            Ok(()) => Ok(artifacts),
            Err(e) => {
                artifacts.destroy(device);
                Err(e)
            }
        }
    }

    fn populate(
        &mut self,
        device: &ash::Device,
        profile: &DeviceProfile,
        swapchain: &Swapchain,
        shaders: &ShaderBlobs,
        clear_color: [f32; 4],
    ) -> EngineResult<()> {
        self.vertex_module = create_shader_module(device, &shaders.vertex)?;
        self.fragment_module = create_shader_module(device, &shaders.fragment)?;
        self.render_pass = create_render_pass(device, swapchain.format, profile.samples)?;
        self.layout = create_pipeline_layout(device)?;
        self.pipeline = create_graphics_pipeline(
            device,
            self.render_pass,
            self.layout,
            swapchain.extent,
            profile.samples,
            self.vertex_module,
            self.fragment_module,
        )?;
        self.framebuffers = create_framebuffers(device, self.render_pass, swapchain)?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(self.framebuffers.len() as u32);
        self.command_buffers = unsafe { device.allocate_command_buffers(&alloc_info) }
            .op("vkAllocateCommandBuffers")?;

        record_command_buffers(
            device,
            &self.command_buffers,
            &self.framebuffers,
            self.render_pass,
            self.pipeline,
            swapchain.extent,
            clear_color,
            DrawCall::TRIANGLE,
        )?;

        log::info!(
            "Recorded {} command buffers at {}x{}",
            self.command_buffers.len(),
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(())
    }

    /// Reverse creation order: command buffers, framebuffers, pipeline,
    /// layout, render pass, shader modules. Null handles are skipped by
    /// the driver.
    pub fn destroy(self, device: &ash::Device) {
        unsafe {
            if !self.command_buffers.is_empty() {
                device.free_command_buffers(self.command_pool, &self.command_buffers);
            }
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
            device.destroy_render_pass(self.render_pass, None);
            device.destroy_shader_module(self.fragment_module, None);
            device.destroy_shader_module(self.vertex_module, None);
        }
    }
}

//! Native graphics pipeline creation using dynamic rendering (Vulkan 1.3).

use crate::context::VulkanContext;
use crate::error::{Result, VkError};
use crate::format;
use ash::vk;
use hashbrown::HashMap;
use opal_gal::{
    DynamicPipelineState, PipelineFactory, PipelineHandle, RenderPipelineDesc,
    ShaderModuleHandle, TextureFormat,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

/// Handle-to-native pipeline map shared between the factory that creates
/// pipelines and the recorder that binds them.
pub type PipelineRegistry = Rc<RefCell<HashMap<u64, vk::Pipeline>>>;

/// Builds and owns native pipeline objects and shader modules.
///
/// Handles returned from [`register_shader`](Self::register_shader) and
/// pipeline creation stay valid until the factory drops. All pipelines
/// share the context's binding-model pipeline layout.
pub struct VulkanPipelineFactory {
    device: Arc<ash::Device>,
    pipeline_layout: vk::PipelineLayout,
    shaders: HashMap<u64, vk::ShaderModule>,
    pipelines: PipelineRegistry,
    next_shader: u64,
    next_pipeline: u64,
}

impl VulkanPipelineFactory {
    pub fn new(context: &VulkanContext) -> Self {
        Self {
            device: context.device().clone(),
            pipeline_layout: context.binding_model().pipeline_layout(),
            shaders: HashMap::new(),
            pipelines: Rc::new(RefCell::new(HashMap::new())),
            next_shader: 1,
            next_pipeline: 1,
        }
    }

    /// A shared view of the pipeline map, for the command recorder.
    pub fn registry(&self) -> PipelineRegistry {
        Rc::clone(&self.pipelines)
    }

    /// Create a shader module from SPIR-V and register it under a handle.
    pub fn register_shader(&mut self, spirv: &[u32]) -> Result<ShaderModuleHandle> {
        let shader_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        let module = unsafe { self.device.create_shader_module(&shader_info, None) }
            .map_err(|e| VkError::ShaderCompilation(e.to_string()))?;

        let handle = ShaderModuleHandle(self.next_shader);
        self.next_shader += 1;
        self.shaders.insert(handle.0, module);
        Ok(handle)
    }

    /// The native pipeline behind a handle, for command recording.
    pub fn resolve(&self, handle: PipelineHandle) -> Option<vk::Pipeline> {
        self.pipelines.borrow().get(&handle.0).copied()
    }

    fn shader(&self, handle: ShaderModuleHandle) -> Result<vk::ShaderModule> {
        self.shaders
            .get(&handle.0)
            .copied()
            .ok_or_else(|| VkError::ResourceNotFound(format!("shader module {}", handle.0)))
    }

    fn build_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
        dynamic: &DynamicPipelineState,
    ) -> Result<vk::Pipeline> {
        let vert_module = self.shader(desc.vertex_shader)?;

        let mut shader_stages = vec![vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(c"main")];

        if let Some(fragment) = desc.fragment_shader {
            shader_stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(self.shader(fragment)?)
                    .name(c"main"),
            );
        }

        // Vertex input
        let vertex_bindings: Vec<vk::VertexInputBindingDescription> = desc
            .vertex_strides
            .iter()
            .enumerate()
            .map(|(i, &stride)| {
                vk::VertexInputBindingDescription::default()
                    .binding(i as u32)
                    .stride(stride)
                    .input_rate(vk::VertexInputRate::VERTEX)
            })
            .collect();

        let vertex_attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .vertex_attributes
            .iter()
            .map(|attr| {
                vk::VertexInputAttributeDescription::default()
                    .location(attr.location)
                    .binding(attr.buffer_index)
                    .format(format::vertex_format(attr.format))
                    .offset(attr.offset)
            })
            .collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&vertex_bindings)
            .vertex_attribute_descriptions(&vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(format::primitive_topology(dynamic.topology))
            .primitive_restart_enable(false);

        // Viewport (dynamic)
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(desc.fragment_shader.is_none())
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(format::cull_mode(desc.cull_mode))
            .front_face(format::front_face(desc.winding))
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let has_depth = dynamic.depth_format != TextureFormat::Invalid;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(has_depth)
            .depth_write_enable(has_depth && dynamic.depth_write_enabled)
            .depth_compare_op(format::compare_op(dynamic.depth_compare))
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        // Attachment formats come from the draw-time state, not the
        // pipeline description; unused trailing slots are trimmed.
        let color_formats: Vec<vk::Format> = dynamic
            .color_formats
            .iter()
            .take_while(|&&f| f != TextureFormat::Invalid)
            .map(|&f| format::texture_format(f))
            .collect();

        let color_blend_attachments: Vec<_> = color_formats
            .iter()
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(desc.blend_enabled)
                    .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                    .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
            })
            .collect();

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);
        if has_depth {
            rendering_info =
                rendering_info.depth_attachment_format(format::texture_format(dynamic.depth_format));
        }

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(self.pipeline_layout)
            .push_next(&mut rendering_info);

        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        }
        .map_err(|(_pipelines, e)| VkError::PipelineCreation(e.to_string()))?;

        Ok(pipelines[0])
    }
}

impl PipelineFactory for VulkanPipelineFactory {
    fn create_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
        dynamic: &DynamicPipelineState,
    ) -> opal_gal::Result<PipelineHandle> {
        let pipeline = self.build_pipeline(desc, dynamic)?;

        let handle = PipelineHandle(self.next_pipeline);
        self.next_pipeline += 1;
        self.pipelines.borrow_mut().insert(handle.0, pipeline);
        tracing::debug!(
            pipeline = %desc.debug_name,
            handle = handle.0,
            "created native graphics pipeline"
        );
        Ok(handle)
    }
}

impl Drop for VulkanPipelineFactory {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for pipeline in self.pipelines.borrow().values() {
                self.device.destroy_pipeline(*pipeline, None);
            }
            for module in self.shaders.values() {
                self.device.destroy_shader_module(*module, None);
            }
        }
    }
}

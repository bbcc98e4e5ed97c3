//! Command recording: the Vulkan implementation of the binding and draw ops.

use crate::context::VulkanContext;
use crate::descriptors::{descriptor_type, set_index, PagePool, ROOT_BUFFER_SLOTS};
use crate::error::{Result, VkError};
use crate::fence::TimelineFence;
use crate::format;
use crate::pipeline::PipelineRegistry;
use ash::vk;
use hashbrown::HashMap;
use opal_gal::{
    BindingCategory, BufferBinding, BufferHandle, DescriptorIndex, DescriptorPageSource,
    DescriptorRange, GalError, GpuAddress, IndexFormat, PageId, PipelineHandle, RenderOps,
    SamplerHandle, StorageBufferBinding, TableOps, TextureHandle,
};
use std::sync::Arc;

/// Maps portable resource handles to native Vulkan objects.
///
/// Handles are non-owning; the application keeps the native objects alive
/// for as long as they stay bound.
#[derive(Default)]
pub struct ResourceTable {
    textures: HashMap<u64, (vk::ImageView, vk::ImageLayout)>,
    samplers: HashMap<u64, vk::Sampler>,
    buffers: HashMap<u64, vk::Buffer>,
    next: u64,
}

impl ResourceTable {
    pub fn register_texture(
        &mut self,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> TextureHandle {
        self.next += 1;
        self.textures.insert(self.next, (view, layout));
        TextureHandle(self.next)
    }

    pub fn register_sampler(&mut self, sampler: vk::Sampler) -> SamplerHandle {
        self.next += 1;
        self.samplers.insert(self.next, sampler);
        SamplerHandle(self.next)
    }

    pub fn register_buffer(&mut self, buffer: vk::Buffer) -> BufferHandle {
        self.next += 1;
        self.buffers.insert(self.next, buffer);
        BufferHandle(self.next)
    }

    pub fn unregister_texture(&mut self, handle: TextureHandle) {
        self.textures.remove(&handle.0);
    }

    pub fn unregister_sampler(&mut self, handle: SamplerHandle) {
        self.samplers.remove(&handle.0);
    }

    pub fn unregister_buffer(&mut self, handle: BufferHandle) {
        self.buffers.remove(&handle.0);
    }
}

/// One buffered descriptor write, keyed by page and offset until the
/// category's table is set.
enum PendingWrite {
    Image(vk::ImageView, vk::ImageLayout),
    Sampler(vk::Sampler),
    UniformBuffer(vk::Buffer, u64, u64),
    StorageBuffer(vk::Buffer, u64, u64),
}

/// Records one command buffer's worth of GPU work.
///
/// Implements the portable ops traits: descriptor writes buffer CPU-side
/// and materialize into pool-backed sets when a table is set; draws and
/// root buffer updates encode directly into the command buffer.
pub struct VulkanRecorder {
    device: Arc<ash::Device>,
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    pipeline_layout: vk::PipelineLayout,
    set_layouts: [vk::DescriptorSetLayout; 4],
    default_sampler: vk::Sampler,
    pipelines: PipelineRegistry,
    pub resources: ResourceTable,
    pages: HashMap<u32, PagePool>,
    next_page: u32,
    pending: HashMap<(u32, u32), PendingWrite>,
}

impl VulkanRecorder {
    pub fn new(context: &VulkanContext, pipelines: PipelineRegistry) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(context.graphics_queue_family())
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool = unsafe { context.device().create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer =
            unsafe { context.device().allocate_command_buffers(&alloc_info) }?[0];

        let model = context.binding_model();
        Ok(Self {
            device: context.device().clone(),
            command_pool,
            command_buffer,
            pipeline_layout: model.pipeline_layout(),
            set_layouts: [
                model.set_layout(BindingCategory::Textures),
                model.set_layout(BindingCategory::Samplers),
                model.set_layout(BindingCategory::Buffers),
                model.set_layout(BindingCategory::Uavs),
            ],
            default_sampler: model.default_sampler(),
            pipelines,
            resources: ResourceTable::default(),
            pages: HashMap::new(),
            next_page: 0,
            pending: HashMap::new(),
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    /// Begin recording.
    pub fn begin(&mut self) -> Result<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.device
                .begin_command_buffer(self.command_buffer, &begin_info)
        }?;
        Ok(())
    }

    /// Finish recording.
    pub fn end(&mut self) -> Result<()> {
        unsafe { self.device.end_command_buffer(self.command_buffer) }?;
        Ok(())
    }

    /// Begin a dynamic rendering pass to a single color target.
    pub fn begin_rendering(
        &mut self,
        color_view: vk::ImageView,
        depth_view: Option<vk::ImageView>,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            });

        let depth_attachment = depth_view.map(|view| {
            vk::RenderingAttachmentInfo::default()
                .image_view(view)
                .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
                .load_op(vk::AttachmentLoadOp::CLEAR)
                .store_op(vk::AttachmentStoreOp::STORE)
                .clear_value(vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue {
                        depth: 1.0,
                        stencil: 0,
                    },
                })
        });

        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment));
        if let Some(depth) = &depth_attachment {
            rendering_info = rendering_info.depth_attachment(depth);
        }

        unsafe {
            self.device
                .cmd_begin_rendering(self.command_buffer, &rendering_info);

            let viewport = vk::Viewport::default()
                .width(extent.width as f32)
                .height(extent.height as f32)
                .min_depth(0.0)
                .max_depth(1.0);
            self.device
                .cmd_set_viewport(self.command_buffer, 0, &[viewport]);
            let scissor = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            self.device
                .cmd_set_scissor(self.command_buffer, 0, &[scissor]);
        }
    }

    /// End the current dynamic rendering pass.
    pub fn end_rendering(&mut self) {
        unsafe {
            self.device.cmd_end_rendering(self.command_buffer);
        }
    }

    /// Submit the command buffer, signaling `value` on the frame fence when
    /// the GPU finishes.
    pub fn submit(&self, queue: vk::Queue, fence: &TimelineFence, value: u64) -> Result<()> {
        let command_buffer_info =
            vk::CommandBufferSubmitInfo::default().command_buffer(self.command_buffer);

        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(fence.semaphore())
            .value(value)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);

        let submit_info = vk::SubmitInfo2::default()
            .command_buffer_infos(std::slice::from_ref(&command_buffer_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));

        unsafe {
            self.device
                .queue_submit2(queue, &[submit_info], vk::Fence::null())
        }?;
        Ok(())
    }

    /// Materialize pending writes for a range into one descriptor set.
    fn materialize_set(
        &mut self,
        model_category: BindingCategory,
        range: DescriptorRange,
    ) -> Result<vk::DescriptorSet> {
        let pool = self
            .pages
            .get(&range.page.0)
            .ok_or_else(|| VkError::ResourceNotFound(format!("page {}", range.page.0)))?;

        let layout = self.set_layouts[set_index(model_category) as usize];
        let set = unsafe { pool.allocate_set(&self.device, layout, range.count) }?;

        let mut image_infos = Vec::new();
        let mut buffer_infos = Vec::new();
        let mut writes: Vec<(u32, usize, bool)> = Vec::new();

        for i in 0..range.count {
            let key = (range.page.0, range.first + i);
            let Some(pending) = self.pending.remove(&key) else {
                // Unbound slot in a declared range; the layout is partially
                // bound so the descriptor stays unwritten.
                continue;
            };
            match pending {
                PendingWrite::Image(view, layout) => {
                    image_infos.push(
                        vk::DescriptorImageInfo::default()
                            .image_view(view)
                            .image_layout(layout),
                    );
                    writes.push((i, image_infos.len() - 1, true));
                }
                PendingWrite::Sampler(sampler) => {
                    image_infos.push(vk::DescriptorImageInfo::default().sampler(sampler));
                    writes.push((i, image_infos.len() - 1, true));
                }
                PendingWrite::UniformBuffer(buffer, offset, size)
                | PendingWrite::StorageBuffer(buffer, offset, size) => {
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(buffer)
                            .offset(offset)
                            .range(size),
                    );
                    writes.push((i, buffer_infos.len() - 1, false));
                }
            }
        }

        let descriptor_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|&(element, info_index, is_image)| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(0)
                    .dst_array_element(element)
                    .descriptor_type(descriptor_type(model_category));
                if is_image {
                    write.image_info(std::slice::from_ref(&image_infos[info_index]))
                } else {
                    write.buffer_info(std::slice::from_ref(&buffer_infos[info_index]))
                }
            })
            .collect();

        if !descriptor_writes.is_empty() {
            unsafe {
                self.device.update_descriptor_sets(&descriptor_writes, &[]);
            }
        }

        Ok(set)
    }
}

impl DescriptorPageSource for VulkanRecorder {
    fn create_page(&mut self, capacity: u32) -> opal_gal::Result<PageId> {
        let pool = unsafe { PagePool::new(&self.device, capacity) }
            .map_err(GalError::from)?;
        let id = PageId(self.next_page);
        self.next_page += 1;
        self.pages.insert(id.0, pool);
        Ok(id)
    }

    fn reset_page(&mut self, page: PageId) -> opal_gal::Result<()> {
        let pool = self.pages.get(&page.0).ok_or_else(|| {
            GalError::InvalidState(format!("reset of unknown page {}", page.0))
        })?;
        unsafe { pool.reset(&self.device) }.map_err(GalError::from)?;
        // Writes buffered against the old generation are stale.
        self.pending.retain(|(p, _), _| *p != page.0);
        Ok(())
    }
}

impl TableOps for VulkanRecorder {
    fn write_texture_descriptor(&mut self, dst: DescriptorIndex, texture: TextureHandle) {
        match self.resources.textures.get(&texture.0) {
            Some(&(view, layout)) => {
                self.pending
                    .insert((dst.page.0, dst.offset), PendingWrite::Image(view, layout));
            }
            None => {
                tracing::error!(handle = texture.0, "unknown texture handle, binding null");
                self.pending.remove(&(dst.page.0, dst.offset));
            }
        }
    }

    fn write_null_texture_descriptor(&mut self, dst: DescriptorIndex) {
        self.pending.remove(&(dst.page.0, dst.offset));
    }

    fn write_sampler_descriptor(&mut self, dst: DescriptorIndex, sampler: Option<SamplerHandle>) {
        let native = sampler
            .and_then(|s| self.resources.samplers.get(&s.0).copied())
            .unwrap_or(self.default_sampler);
        self.pending
            .insert((dst.page.0, dst.offset), PendingWrite::Sampler(native));
    }

    fn write_uniform_descriptor(&mut self, dst: DescriptorIndex, binding: &BufferBinding) {
        match self.resources.buffers.get(&binding.buffer.0) {
            Some(&buffer) => {
                self.pending.insert(
                    (dst.page.0, dst.offset),
                    PendingWrite::UniformBuffer(buffer, binding.offset, binding.size),
                );
            }
            None => {
                tracing::error!(handle = binding.buffer.0, "unknown buffer handle");
                self.pending.remove(&(dst.page.0, dst.offset));
            }
        }
    }

    fn write_null_uniform_descriptor(&mut self, dst: DescriptorIndex) {
        self.pending.remove(&(dst.page.0, dst.offset));
    }

    fn write_storage_descriptor(&mut self, dst: DescriptorIndex, binding: &StorageBufferBinding) {
        match self.resources.buffers.get(&binding.base.buffer.0) {
            Some(&buffer) => {
                self.pending.insert(
                    (dst.page.0, dst.offset),
                    PendingWrite::StorageBuffer(buffer, binding.base.offset, binding.base.size),
                );
            }
            None => {
                tracing::error!(handle = binding.base.buffer.0, "unknown buffer handle");
                self.pending.remove(&(dst.page.0, dst.offset));
            }
        }
    }

    fn write_null_storage_descriptor(&mut self, dst: DescriptorIndex) {
        self.pending.remove(&(dst.page.0, dst.offset));
    }

    fn set_descriptor_table(&mut self, category: BindingCategory, range: DescriptorRange) {
        match self.materialize_set(category, range) {
            Ok(set) => unsafe {
                self.device.cmd_bind_descriptor_sets(
                    self.command_buffer,
                    vk::PipelineBindPoint::GRAPHICS,
                    self.pipeline_layout,
                    set_index(category),
                    &[set],
                    &[],
                );
            },
            Err(err) => {
                tracing::error!(?category, %err, "descriptor table materialization failed");
            }
        }
    }

    fn set_root_buffer(&mut self, slot: u32, address: GpuAddress) {
        debug_assert!(slot < ROOT_BUFFER_SLOTS);
        let bytes = address.to_ne_bytes();
        unsafe {
            self.device.cmd_push_constants(
                self.command_buffer,
                self.pipeline_layout,
                vk::ShaderStageFlags::VERTEX
                    | vk::ShaderStageFlags::FRAGMENT
                    | vk::ShaderStageFlags::COMPUTE,
                slot * 8,
                &bytes,
            );
        }
    }
}

impl RenderOps for VulkanRecorder {
    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        let Some(native) = self.pipelines.borrow().get(&pipeline.0).copied() else {
            tracing::error!(handle = pipeline.0, "unknown pipeline handle");
            return;
        };
        unsafe {
            self.device.cmd_bind_pipeline(
                self.command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                native,
            );
        }
    }

    fn bind_vertex_buffer(&mut self, index: u32, buffer: BufferHandle, offset: u64) {
        let Some(&native) = self.resources.buffers.get(&buffer.0) else {
            tracing::error!(handle = buffer.0, "unknown vertex buffer handle");
            return;
        };
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(self.command_buffer, index, &[native], &[offset]);
        }
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat, offset: u64) {
        let Some(&native) = self.resources.buffers.get(&buffer.0) else {
            tracing::error!(handle = buffer.0, "unknown index buffer handle");
            return;
        };
        unsafe {
            self.device.cmd_bind_index_buffer(
                self.command_buffer,
                native,
                offset,
                format::index_type(format),
            );
        }
    }

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                self.command_buffer,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                self.command_buffer,
                index_count,
                instance_count,
                first_index,
                base_vertex,
                first_instance,
            );
        }
    }
}

impl Drop for VulkanRecorder {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            for pool in self.pages.values() {
                pool.destroy(&self.device);
            }
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

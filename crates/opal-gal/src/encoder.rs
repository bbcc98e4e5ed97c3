//! Render command encoding: the draw loop that ties binder, pipeline cache,
//! and transient descriptors together.

use std::rc::Rc;

use tracing::warn;

use crate::bindings::{BufferBinding, StorageBufferBinding};
use crate::binder::{BindPoint, ResourceBinder, TableBinder, TableOps};
use crate::error::{GalError, Result};
use crate::pipeline::{DynamicPipelineState, PipelineFactory, RenderPipelineState};
use crate::transient::FrameContext;
use crate::types::{
    BufferHandle, CompareOp, IndexFormat, PipelineHandle, SamplerHandle, TextureFormat,
    TextureHandle, MAX_COLOR_ATTACHMENTS,
};

/// Native draw-stream operations a backend command recorder exposes.
pub trait RenderOps {
    fn set_pipeline(&mut self, pipeline: PipelineHandle);
    fn bind_vertex_buffer(&mut self, index: u32, buffer: BufferHandle, offset: u64);
    fn bind_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat, offset: u64);
    fn draw(&mut self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32);
    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    );
}

/// Attachment formats of the pass being encoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct RenderPassDesc {
    pub color_formats: [TextureFormat; MAX_COLOR_ATTACHMENTS],
    pub depth_format: TextureFormat,
}

/// Records draws for one render pass.
///
/// Pipelines bound here are specialized to the pass's attachment formats
/// through the variant cache; bindings are recorded into the table binder
/// and materialized lazily at each draw.
pub struct CommandEncoder<'a, D, F>
where
    D: TableOps + RenderOps,
    F: PipelineFactory,
{
    device: &'a mut D,
    frame: &'a mut FrameContext,
    factory: &'a mut F,
    binder: TableBinder,
    dynamic_state: DynamicPipelineState,
    pipeline: Option<Rc<RenderPipelineState>>,
    bound_native: Option<PipelineHandle>,
    draw_count: u32,
}

impl<'a, D, F> CommandEncoder<'a, D, F>
where
    D: TableOps + RenderOps,
    F: PipelineFactory,
{
    pub fn new(
        device: &'a mut D,
        frame: &'a mut FrameContext,
        factory: &'a mut F,
        pass: &RenderPassDesc,
    ) -> Self {
        Self {
            device,
            frame,
            factory,
            binder: TableBinder::new(BindPoint::Graphics),
            dynamic_state: DynamicPipelineState {
                color_formats: pass.color_formats,
                depth_format: pass.depth_format,
                ..Default::default()
            },
            pipeline: None,
            bound_native: None,
            draw_count: 0,
        }
    }

    /// Draws recorded so far, for frame diagnostics.
    pub fn draw_count(&self) -> u32 {
        self.draw_count
    }

    /// Native descriptor writes issued so far.
    pub fn descriptor_writes(&self) -> u64 {
        self.binder.descriptor_writes()
    }

    /// Makes `pipeline` current. Switching to a pipeline with a different
    /// binding layout drops recorded bindings, since slot meanings change.
    pub fn bind_render_pipeline_state(&mut self, pipeline: &Rc<RenderPipelineState>) {
        if let Some(previous) = &self.pipeline {
            if !previous.is_compatible_with(pipeline) {
                self.binder.reset();
            }
        }
        self.dynamic_state.topology = pipeline.desc().topology;
        self.pipeline = Some(Rc::clone(pipeline));
    }

    pub fn set_depth_write_enabled(&mut self, enabled: bool) {
        self.dynamic_state.depth_write_enabled = enabled;
    }

    pub fn set_depth_compare(&mut self, compare: CompareOp) {
        self.dynamic_state.depth_compare = compare;
    }

    pub fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        self.binder.bind_texture(slot, texture);
    }

    pub fn bind_sampler_state(&mut self, slot: u32, sampler: Option<SamplerHandle>) {
        self.binder.bind_sampler_state(slot, sampler);
    }

    pub fn bind_uniform_buffer(&mut self, slot: u32, binding: Option<BufferBinding>) -> Result<()> {
        self.binder.bind_uniform_buffer(slot, binding)
    }

    pub fn bind_storage_buffer(
        &mut self,
        slot: u32,
        binding: Option<StorageBufferBinding>,
    ) -> Result<()> {
        self.binder.bind_storage_buffer(slot, binding)
    }

    /// Binds a texture by its reflected shader name. Unknown names log a
    /// warning and leave bindings untouched.
    pub fn bind_texture_by_name(&mut self, name: &str, texture: Option<TextureHandle>) {
        match self.reflected_texture_slot(name) {
            Some(slot) => self.binder.bind_texture(slot, texture),
            None => warn!(name, "texture name not found in shader reflection"),
        }
    }

    /// Binds a sampler by its reflected shader name.
    pub fn bind_sampler_state_by_name(&mut self, name: &str, sampler: Option<SamplerHandle>) {
        match self
            .pipeline
            .as_ref()
            .and_then(|p| p.reflection().sampler_slot(name))
        {
            Some(slot) => self.binder.bind_sampler_state(slot, sampler),
            None => warn!(name, "sampler name not found in shader reflection"),
        }
    }

    /// Binds a uniform buffer by its reflected shader name.
    pub fn bind_uniform_buffer_by_name(
        &mut self,
        name: &str,
        binding: Option<BufferBinding>,
    ) -> Result<()> {
        match self
            .pipeline
            .as_ref()
            .and_then(|p| p.reflection().buffer_slot(name))
        {
            Some(slot) => self.binder.bind_uniform_buffer(slot, binding),
            None => {
                warn!(name, "buffer name not found in shader reflection");
                Ok(())
            }
        }
    }

    pub fn bind_vertex_buffer(&mut self, index: u32, buffer: BufferHandle, offset: u64) {
        self.device.bind_vertex_buffer(index, buffer, offset);
    }

    pub fn bind_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat, offset: u64) {
        self.device.bind_index_buffer(buffer, format, offset);
    }

    /// Issues a non-indexed draw. The draw is skipped when binding
    /// materialization fails; the error propagates to the caller.
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> Result<()> {
        self.prepare_draw()?;
        self.device.draw(vertex_count, instance_count, 0, 0);
        self.draw_count += 1;
        Ok(())
    }

    /// Issues an indexed draw, skipped on binding failure.
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> Result<()> {
        self.prepare_draw()?;
        self.device.draw_indexed(index_count, instance_count, 0, 0, 0);
        self.draw_count += 1;
        Ok(())
    }

    /// Finishes the pass and returns recorded state to the device.
    pub fn end_encoding(self) {}

    fn prepare_draw(&mut self) -> Result<()> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| GalError::InvalidState("draw without a bound pipeline".into()))?;

        let native = pipeline.pipeline_for(self.factory, &self.dynamic_state);
        if self.bound_native != Some(native) {
            self.device.set_pipeline(native);
            self.bound_native = Some(native);
        }

        self.binder
            .update_bindings(self.device, self.frame, pipeline.layout())
    }

    fn reflected_texture_slot(&self, name: &str) -> Option<u32> {
        self.pipeline
            .as_ref()
            .and_then(|p| p.reflection().texture_slot(name))
    }
}

//! Direct-bind command adaptation for backends without descriptor tables.
//!
//! Where [`TableBinder`](crate::binder::TableBinder) materializes descriptor
//! ranges, the [`CommandAdapter`] tracks dirty state per slot and replays
//! individual bind calls right before a draw.

use tracing::error;

use crate::binder::ResourceBinder;
use crate::bindings::{BufferBinding, SlotTable, StorageBufferBinding};
use crate::error::Result;
use crate::types::{
    PipelineHandle, SamplerHandle, TextureHandle, MAX_BUFFER_SLOTS, MAX_SAMPLER_SLOTS,
    MAX_TEXTURE_SLOTS, MAX_VERTEX_BUFFERS,
};

use bitflags::bitflags;

bitflags! {
    /// Non-slot state the adapter replays when dirty.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct StateMask: u8 {
        const PIPELINE = 1 << 0;
        const DEPTH_STENCIL = 1 << 1;
    }
}

/// Native bind calls a direct-bind backend exposes to the adapter.
pub trait DirectOps {
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);
    fn bind_texture_unit(&mut self, slot: u32, texture: Option<TextureHandle>);
    fn bind_sampler_unit(&mut self, slot: u32, sampler: Option<SamplerHandle>);
    fn bind_uniform_range(&mut self, slot: u32, binding: Option<&BufferBinding>);
    fn bind_storage_range(&mut self, slot: u32, binding: Option<&StorageBufferBinding>);
    fn bind_vertex_slot(&mut self, slot: u32, binding: Option<&BufferBinding>);
    fn set_depth_state(&mut self, write_enabled: bool);
}

/// Per-slot dirty-tracked state replayed at draw time.
pub struct CommandAdapter {
    textures: SlotTable<TextureHandle, MAX_TEXTURE_SLOTS>,
    samplers: SlotTable<SamplerHandle, MAX_SAMPLER_SLOTS>,
    uniforms: SlotTable<BufferBinding, MAX_BUFFER_SLOTS>,
    storage: SlotTable<StorageBufferBinding, MAX_BUFFER_SLOTS>,
    vertex_buffers: SlotTable<BufferBinding, MAX_VERTEX_BUFFERS>,
    texture_dirty: u32,
    sampler_dirty: u32,
    uniform_dirty: u32,
    storage_dirty: u32,
    vertex_dirty: u32,
    pipeline: Option<PipelineHandle>,
    depth_write_enabled: bool,
    state_dirty: StateMask,
}

impl CommandAdapter {
    pub fn new() -> Self {
        Self {
            textures: SlotTable::default(),
            samplers: SlotTable::default(),
            uniforms: SlotTable::default(),
            storage: SlotTable::default(),
            vertex_buffers: SlotTable::default(),
            texture_dirty: 0,
            sampler_dirty: 0,
            uniform_dirty: 0,
            storage_dirty: 0,
            vertex_dirty: 0,
            pipeline: None,
            depth_write_enabled: true,
            state_dirty: StateMask::empty(),
        }
    }

    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        if self.pipeline != Some(pipeline) {
            self.pipeline = Some(pipeline);
            self.state_dirty |= StateMask::PIPELINE;
        }
    }

    pub fn set_depth_write(&mut self, enabled: bool) {
        if self.depth_write_enabled != enabled {
            self.depth_write_enabled = enabled;
            self.state_dirty |= StateMask::DEPTH_STENCIL;
        }
    }

    pub fn bind_vertex_buffer(&mut self, slot: u32, binding: Option<BufferBinding>) {
        if self.vertex_buffers.set(slot, binding) {
            self.vertex_dirty |= 1 << slot;
        } else {
            error!(slot, "vertex buffer slot out of range");
        }
    }

    /// Replays all dirty state in draw order: pipeline first, then slots.
    pub fn will_draw(&mut self, ops: &mut impl DirectOps) -> Result<()> {
        if self.state_dirty.contains(StateMask::PIPELINE) {
            if let Some(pipeline) = self.pipeline {
                ops.bind_pipeline(pipeline);
            }
        }
        if self.state_dirty.contains(StateMask::DEPTH_STENCIL) {
            ops.set_depth_state(self.depth_write_enabled);
        }
        self.state_dirty = StateMask::empty();

        let mut mask = self.vertex_dirty;
        while mask != 0 {
            let slot = mask.trailing_zeros();
            ops.bind_vertex_slot(slot, self.vertex_buffers.get(slot).as_ref());
            mask &= mask - 1;
        }
        self.vertex_dirty = 0;

        let mut mask = self.texture_dirty;
        while mask != 0 {
            let slot = mask.trailing_zeros();
            ops.bind_texture_unit(slot, self.textures.get(slot));
            mask &= mask - 1;
        }
        self.texture_dirty = 0;

        let mut mask = self.sampler_dirty;
        while mask != 0 {
            let slot = mask.trailing_zeros();
            ops.bind_sampler_unit(slot, self.samplers.get(slot));
            mask &= mask - 1;
        }
        self.sampler_dirty = 0;

        let mut mask = self.uniform_dirty;
        while mask != 0 {
            let slot = mask.trailing_zeros();
            ops.bind_uniform_range(slot, self.uniforms.get(slot).as_ref());
            mask &= mask - 1;
        }
        self.uniform_dirty = 0;

        let mut mask = self.storage_dirty;
        while mask != 0 {
            let slot = mask.trailing_zeros();
            ops.bind_storage_range(slot, self.storage.get(slot).as_ref());
            mask &= mask - 1;
        }
        self.storage_dirty = 0;

        Ok(())
    }

    /// Drops recorded resources so stale bindings cannot leak into the next
    /// pipeline, and marks everything for replay.
    pub fn clear_dependent_resources(&mut self) {
        self.textures.clear();
        self.samplers.clear();
        self.uniforms.clear();
        self.storage.clear();
        self.vertex_buffers.clear();
        self.texture_dirty = u32::MAX >> (32 - MAX_TEXTURE_SLOTS);
        self.sampler_dirty = u32::MAX >> (32 - MAX_SAMPLER_SLOTS);
        self.uniform_dirty = u32::MAX >> (32 - MAX_BUFFER_SLOTS);
        self.storage_dirty = u32::MAX >> (32 - MAX_BUFFER_SLOTS);
        self.vertex_dirty = u32::MAX >> (32 - MAX_VERTEX_BUFFERS);
        self.state_dirty = StateMask::all();
    }
}

impl ResourceBinder for CommandAdapter {
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        if self.textures.set(slot, texture) {
            self.texture_dirty |= 1 << slot;
        } else {
            error!(slot, "texture unit out of range");
        }
    }

    fn bind_sampler_state(&mut self, slot: u32, sampler: Option<SamplerHandle>) {
        if self.samplers.set(slot, sampler) {
            self.sampler_dirty |= 1 << slot;
        } else {
            error!(slot, "sampler unit out of range");
        }
    }

    fn bind_uniform_buffer(&mut self, slot: u32, binding: Option<BufferBinding>) -> Result<()> {
        if self.uniforms.set(slot, binding) {
            self.uniform_dirty |= 1 << slot;
        } else {
            error!(slot, "uniform buffer slot out of range");
        }
        Ok(())
    }

    fn bind_storage_buffer(
        &mut self,
        slot: u32,
        binding: Option<StorageBufferBinding>,
    ) -> Result<()> {
        if let Some(binding) = &binding {
            if binding.element_stride == 0 {
                error!(slot, "storage buffer with zero element stride");
                return Ok(());
            }
        }
        if self.storage.set(slot, binding) {
            self.storage_dirty |= 1 << slot;
        } else {
            error!(slot, "storage buffer slot out of range");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.clear_dependent_resources();
    }
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self::new()
    }
}

//! Shared mock backends for unit tests.

use crate::bindings::{BufferBinding, StorageBufferBinding};
use crate::binder::TableOps;
use crate::encoder::RenderOps;
use crate::error::Result;
use crate::transient::{DescriptorPageSource, DescriptorRange, GpuFence};
use crate::types::{
    BindingCategory, BufferHandle, DescriptorIndex, GpuAddress, IndexFormat, PageId,
    PipelineHandle, SamplerHandle, TextureHandle,
};

/// Fence that never advances; frames never complete.
pub struct NullFence;

impl GpuFence for NullFence {
    fn completed_value(&self) -> u64 {
        0
    }
}

/// One recorded descriptor write.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TableWrite {
    Texture { dst: DescriptorIndex, texture: TextureHandle },
    NullTexture { dst: DescriptorIndex },
    Sampler { dst: DescriptorIndex, sampler: Option<SamplerHandle> },
    Uniform { dst: DescriptorIndex, buffer: BufferHandle },
    NullUniform { dst: DescriptorIndex },
    Storage { dst: DescriptorIndex, buffer: BufferHandle },
    NullStorage { dst: DescriptorIndex },
}

/// One recorded draw call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawCall {
    Draw { vertex_count: u32, instance_count: u32 },
    DrawIndexed { index_count: u32, instance_count: u32 },
}

/// Records every native operation for assertion.
#[derive(Default)]
pub struct RecordingOps {
    next_page: u32,
    pub writes: Vec<TableWrite>,
    pub tables: Vec<(BindingCategory, DescriptorRange)>,
    pub root_buffers: Vec<(u32, GpuAddress)>,
    pub pipelines: Vec<PipelineHandle>,
    pub draws: Vec<DrawCall>,
}

impl DescriptorPageSource for RecordingOps {
    fn create_page(&mut self, _capacity: u32) -> Result<PageId> {
        let id = PageId(self.next_page);
        self.next_page += 1;
        Ok(id)
    }
}

impl TableOps for RecordingOps {
    fn write_texture_descriptor(&mut self, dst: DescriptorIndex, texture: TextureHandle) {
        self.writes.push(TableWrite::Texture { dst, texture });
    }

    fn write_null_texture_descriptor(&mut self, dst: DescriptorIndex) {
        self.writes.push(TableWrite::NullTexture { dst });
    }

    fn write_sampler_descriptor(&mut self, dst: DescriptorIndex, sampler: Option<SamplerHandle>) {
        self.writes.push(TableWrite::Sampler { dst, sampler });
    }

    fn write_uniform_descriptor(&mut self, dst: DescriptorIndex, binding: &BufferBinding) {
        self.writes.push(TableWrite::Uniform {
            dst,
            buffer: binding.buffer,
        });
    }

    fn write_null_uniform_descriptor(&mut self, dst: DescriptorIndex) {
        self.writes.push(TableWrite::NullUniform { dst });
    }

    fn write_storage_descriptor(&mut self, dst: DescriptorIndex, binding: &StorageBufferBinding) {
        self.writes.push(TableWrite::Storage {
            dst,
            buffer: binding.base.buffer,
        });
    }

    fn write_null_storage_descriptor(&mut self, dst: DescriptorIndex) {
        self.writes.push(TableWrite::NullStorage { dst });
    }

    fn set_descriptor_table(&mut self, category: BindingCategory, range: DescriptorRange) {
        self.tables.push((category, range));
    }

    fn set_root_buffer(&mut self, slot: u32, address: GpuAddress) {
        self.root_buffers.push((slot, address));
    }
}

impl RenderOps for RecordingOps {
    fn set_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.push(pipeline);
    }

    fn bind_vertex_buffer(&mut self, _index: u32, _buffer: BufferHandle, _offset: u64) {}

    fn bind_index_buffer(&mut self, _buffer: BufferHandle, _format: IndexFormat, _offset: u64) {}

    fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.draws.push(DrawCall::Draw {
            vertex_count,
            instance_count,
        });
    }

    fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _base_vertex: i32,
        _first_instance: u32,
    ) {
        self.draws.push(DrawCall::DrawIndexed {
            index_count,
            instance_count,
        });
    }
}

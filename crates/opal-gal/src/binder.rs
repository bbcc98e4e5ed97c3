//! Descriptor-table binding with dirty tracking and deferred flush.
//!
//! The [`TableBinder`] records binding intent into CPU-side slot tables and
//! materializes descriptors only when a draw or dispatch actually needs
//! them. Each category (textures, samplers, buffers, UAVs) flushes into one
//! contiguous descriptor range per update and sets exactly one table.

use tracing::{error, trace};

use crate::bindings::{BufferBinding, SlotTable, StorageBufferBinding};
use crate::error::{GalError, Result};
use crate::reflection::BindingLayout;
use crate::transient::{DescriptorPageSource, DescriptorRange, FrameContext};
use crate::types::{
    BindingCategory, DescriptorIndex, DirtyFlags, GpuAddress, SamplerHandle, TextureHandle,
    MAX_BUFFER_SLOTS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS, MAX_UNIFORM_BUFFER_RANGE,
    UNIFORM_BUFFER_ALIGNMENT,
};

/// Whether bindings target the graphics or compute pipeline.
///
/// Compute shaders address buffers by exact register, so sparse buffer and
/// UAV tables are rejected there; graphics tables pad gaps with null
/// descriptors instead.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Records binding intent between draws.
///
/// Implemented by [`TableBinder`] for descriptor-table backends and by
/// [`CommandAdapter`](crate::adapter::CommandAdapter) for direct-bind
/// backends.
pub trait ResourceBinder {
    /// Binds or clears a texture slot.
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>);

    /// Binds or clears a sampler slot.
    fn bind_sampler_state(&mut self, slot: u32, sampler: Option<SamplerHandle>);

    /// Binds or clears a uniform buffer slot.
    fn bind_uniform_buffer(&mut self, slot: u32, binding: Option<BufferBinding>) -> Result<()>;

    /// Binds or clears a storage (read/write) buffer slot.
    fn bind_storage_buffer(
        &mut self,
        slot: u32,
        binding: Option<StorageBufferBinding>,
    ) -> Result<()>;

    /// Drops all recorded bindings and marks every category dirty.
    fn reset(&mut self);
}

/// Native operations a descriptor-table backend exposes to the binder.
pub trait TableOps: DescriptorPageSource {
    fn write_texture_descriptor(&mut self, dst: DescriptorIndex, texture: TextureHandle);
    fn write_null_texture_descriptor(&mut self, dst: DescriptorIndex);
    /// `None` writes the backend's default sampler.
    fn write_sampler_descriptor(&mut self, dst: DescriptorIndex, sampler: Option<SamplerHandle>);
    fn write_uniform_descriptor(&mut self, dst: DescriptorIndex, binding: &BufferBinding);
    fn write_null_uniform_descriptor(&mut self, dst: DescriptorIndex);
    fn write_storage_descriptor(&mut self, dst: DescriptorIndex, binding: &StorageBufferBinding);
    fn write_null_storage_descriptor(&mut self, dst: DescriptorIndex);
    /// Points the pipeline's table for `category` at a materialized range.
    fn set_descriptor_table(&mut self, category: BindingCategory, range: DescriptorRange);
    /// Binds a buffer address directly as a root descriptor.
    fn set_root_buffer(&mut self, slot: u32, address: GpuAddress);
}

/// Dirty-tracked slot tables flushed into transient descriptor ranges.
pub struct TableBinder {
    bind_point: BindPoint,
    textures: SlotTable<TextureHandle, MAX_TEXTURE_SLOTS>,
    samplers: SlotTable<SamplerHandle, MAX_SAMPLER_SLOTS>,
    uniforms: SlotTable<BufferBinding, MAX_BUFFER_SLOTS>,
    uavs: SlotTable<StorageBufferBinding, MAX_BUFFER_SLOTS>,
    dirty: DirtyFlags,
    descriptor_writes: u64,
}

impl TableBinder {
    pub fn new(bind_point: BindPoint) -> Self {
        Self {
            bind_point,
            textures: SlotTable::default(),
            samplers: SlotTable::default(),
            uniforms: SlotTable::default(),
            uavs: SlotTable::default(),
            dirty: DirtyFlags::all(),
            descriptor_writes: 0,
        }
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    /// Total native descriptor writes issued, for frame diagnostics.
    pub fn descriptor_writes(&self) -> u64 {
        self.descriptor_writes
    }

    /// Materializes every dirty category into fresh descriptor ranges.
    ///
    /// Each category's dirty bit clears only once that category flushed
    /// successfully; a failure leaves its bit set so the next update
    /// retries it.
    pub fn update_bindings(
        &mut self,
        ops: &mut impl TableOps,
        frame: &mut FrameContext,
        layout: &BindingLayout,
    ) -> Result<()> {
        if self.dirty.contains(DirtyFlags::TEXTURES) {
            let written = self.flush_textures(ops, frame, layout)?;
            self.descriptor_writes += u64::from(written);
            self.dirty.remove(DirtyFlags::TEXTURES);
        }
        if self.dirty.contains(DirtyFlags::SAMPLERS) {
            let written = self.flush_samplers(ops, frame, layout)?;
            self.descriptor_writes += u64::from(written);
            self.dirty.remove(DirtyFlags::SAMPLERS);
        }
        if self.dirty.contains(DirtyFlags::BUFFERS) {
            let written = self.flush_buffers(ops, frame, layout)?;
            self.descriptor_writes += u64::from(written);
            self.dirty.remove(DirtyFlags::BUFFERS);
        }
        if self.dirty.contains(DirtyFlags::UAVS) {
            let written = self.flush_uavs(ops, frame, layout)?;
            self.descriptor_writes += u64::from(written);
            self.dirty.remove(DirtyFlags::UAVS);
        }
        Ok(())
    }

    fn flush_textures(
        &self,
        ops: &mut impl TableOps,
        frame: &mut FrameContext,
        layout: &BindingLayout,
    ) -> Result<u32> {
        let count = table_size(layout.texture_table_count, self.textures.count());
        if count == 0 {
            return Ok(0);
        }
        let range = frame.allocator.allocate(ops, count)?;
        for i in 0..count {
            match self.textures.get(i) {
                Some(texture) => ops.write_texture_descriptor(range.index(i), texture),
                None => ops.write_null_texture_descriptor(range.index(i)),
            }
        }
        ops.set_descriptor_table(BindingCategory::Textures, range);
        trace!(count, "flushed texture table");
        Ok(count)
    }

    fn flush_samplers(
        &self,
        ops: &mut impl TableOps,
        frame: &mut FrameContext,
        layout: &BindingLayout,
    ) -> Result<u32> {
        let count = table_size(layout.sampler_table_count, self.samplers.count());
        if count == 0 {
            return Ok(0);
        }
        let range = frame.allocator.allocate(ops, count)?;
        for i in 0..count {
            ops.write_sampler_descriptor(range.index(i), self.samplers.get(i));
        }
        ops.set_descriptor_table(BindingCategory::Samplers, range);
        Ok(count)
    }

    fn flush_buffers(
        &self,
        ops: &mut impl TableOps,
        frame: &mut FrameContext,
        layout: &BindingLayout,
    ) -> Result<u32> {
        let root_slots = layout.root_buffer_slots;

        if self.bind_point == BindPoint::Compute {
            if let Some(slot) = self.uniforms.first_gap() {
                return Err(GalError::SparseBindings {
                    category: BindingCategory::Buffers,
                    slot,
                    count: self.uniforms.count(),
                });
            }
        }

        // Leading slots bypass the table and bind as root descriptors.
        for slot in 0..root_slots.min(self.uniforms.count()) {
            if let Some(binding) = self.uniforms.get(slot) {
                ops.set_root_buffer(slot, binding.region_address());
            }
        }

        let table_bound = self.uniforms.count().saturating_sub(root_slots);
        let count = table_size(layout.buffer_table_count, table_bound);
        if count == 0 {
            return Ok(0);
        }
        let range = frame.allocator.allocate(ops, count)?;
        for i in 0..count {
            match self.uniforms.get(root_slots + i) {
                Some(binding) => ops.write_uniform_descriptor(range.index(i), &binding),
                None => ops.write_null_uniform_descriptor(range.index(i)),
            }
        }
        ops.set_descriptor_table(BindingCategory::Buffers, range);
        Ok(count)
    }

    fn flush_uavs(
        &self,
        ops: &mut impl TableOps,
        frame: &mut FrameContext,
        layout: &BindingLayout,
    ) -> Result<u32> {
        if self.bind_point == BindPoint::Compute {
            if let Some(slot) = self.uavs.first_gap() {
                return Err(GalError::SparseBindings {
                    category: BindingCategory::Uavs,
                    slot,
                    count: self.uavs.count(),
                });
            }
        }
        let count = table_size(layout.uav_table_count, self.uavs.count());
        if count == 0 {
            return Ok(0);
        }
        let range = frame.allocator.allocate(ops, count)?;
        for i in 0..count {
            match self.uavs.get(i) {
                Some(binding) => ops.write_storage_descriptor(range.index(i), &binding),
                None => ops.write_null_storage_descriptor(range.index(i)),
            }
        }
        ops.set_descriptor_table(BindingCategory::Uavs, range);
        Ok(count)
    }
}

impl ResourceBinder for TableBinder {
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        if self.textures.set(slot, texture) {
            self.dirty |= DirtyFlags::TEXTURES;
        } else {
            error!(slot, "texture slot out of range");
        }
    }

    fn bind_sampler_state(&mut self, slot: u32, sampler: Option<SamplerHandle>) {
        if self.samplers.set(slot, sampler) {
            self.dirty |= DirtyFlags::SAMPLERS;
        } else {
            error!(slot, "sampler slot out of range");
        }
    }

    fn bind_uniform_buffer(&mut self, slot: u32, binding: Option<BufferBinding>) -> Result<()> {
        if let Some(binding) = binding {
            validate_uniform_binding(slot, &binding)?;
        }
        if self.uniforms.set(slot, binding) {
            self.dirty |= DirtyFlags::BUFFERS;
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
        if let Some(binding) = binding {
            validate_storage_binding(slot, &binding)?;
        }
        if self.uavs.set(slot, binding) {
            self.dirty |= DirtyFlags::UAVS;
        } else {
            error!(slot, "storage buffer slot out of range");
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.textures.clear();
        self.samplers.clear();
        self.uniforms.clear();
        self.uavs.clear();
        self.dirty = DirtyFlags::all();
    }
}

/// Declared table counts win over bound counts so descriptor ranges always
/// cover the shader-visible register space.
fn table_size(declared: u32, bound: u32) -> u32 {
    if declared > 0 {
        declared
    } else {
        bound
    }
}

fn validate_uniform_binding(slot: u32, binding: &BufferBinding) -> Result<()> {
    if binding.region_address() % UNIFORM_BUFFER_ALIGNMENT != 0 {
        return Err(GalError::InvalidBinding(format!(
            "uniform buffer at slot {slot} is not {UNIFORM_BUFFER_ALIGNMENT}-byte aligned (offset {})",
            binding.offset
        )));
    }
    if binding.size > MAX_UNIFORM_BUFFER_RANGE {
        return Err(GalError::InvalidBinding(format!(
            "uniform buffer at slot {slot} spans {} bytes, max is {MAX_UNIFORM_BUFFER_RANGE}",
            binding.size
        )));
    }
    if binding.offset + binding.size > binding.len {
        return Err(GalError::InvalidBinding(format!(
            "uniform buffer at slot {slot} range {}..{} exceeds buffer length {}",
            binding.offset,
            binding.offset + binding.size,
            binding.len
        )));
    }
    Ok(())
}

fn validate_storage_binding(slot: u32, binding: &StorageBufferBinding) -> Result<()> {
    let base = &binding.base;
    if binding.element_stride == 0 {
        return Err(GalError::InvalidBinding(format!(
            "storage buffer at slot {slot} has zero element stride"
        )));
    }
    if base.offset % binding.element_stride != 0 {
        return Err(GalError::InvalidBinding(format!(
            "storage buffer at slot {slot} offset {} is not a multiple of stride {}",
            base.offset, binding.element_stride
        )));
    }
    if base.offset + base.size > base.len {
        return Err(GalError::InvalidBinding(format!(
            "storage buffer at slot {slot} range {}..{} exceeds buffer length {}",
            base.offset,
            base.offset + base.size,
            base.len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GalConfig;
    use crate::testing::{NullFence, RecordingOps, TableWrite};
    use crate::types::BufferHandle;
    use std::rc::Rc;

    fn frame() -> FrameContext {
        FrameContext::new(&GalConfig::default(), Rc::new(NullFence))
    }

    fn uniform(address: u64, offset: u64, size: u64, len: u64) -> BufferBinding {
        BufferBinding {
            buffer: BufferHandle(7),
            address,
            offset,
            size,
            len,
        }
    }

    #[test]
    fn second_update_without_changes_is_a_noop() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        binder.bind_texture(0, Some(TextureHandle(1)));
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        let writes_after_first = ops.writes.len();
        let tables_after_first = ops.tables.len();
        assert!(writes_after_first > 0);

        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        assert_eq!(ops.writes.len(), writes_after_first);
        assert_eq!(ops.tables.len(), tables_after_first);
    }

    #[test]
    fn rebinding_one_texture_flushes_only_textures() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        binder.bind_texture(0, Some(TextureHandle(1)));
        binder.bind_sampler_state(0, Some(SamplerHandle(2)));
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        ops.writes.clear();
        ops.tables.clear();

        binder.bind_texture(0, Some(TextureHandle(9)));
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        assert_eq!(ops.tables.len(), 1);
        assert_eq!(ops.tables[0].0, BindingCategory::Textures);
    }

    #[test]
    fn declared_table_count_pads_with_nulls() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout {
            texture_table_count: 4,
            ..Default::default()
        };

        binder.bind_texture(1, Some(TextureHandle(5)));
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();

        let texture_writes: Vec<_> = ops
            .writes
            .iter()
            .filter(|w| matches!(w, TableWrite::Texture { .. } | TableWrite::NullTexture { .. }))
            .collect();
        assert_eq!(texture_writes.len(), 4);
        let nulls = texture_writes
            .iter()
            .filter(|w| matches!(w, TableWrite::NullTexture { .. }))
            .count();
        assert_eq!(nulls, 3);
    }

    #[test]
    fn compute_sparse_buffers_rejected() {
        let mut binder = TableBinder::new(BindPoint::Compute);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        binder
            .bind_uniform_buffer(0, Some(uniform(0x1000, 0, 256, 1024)))
            .unwrap();
        binder
            .bind_uniform_buffer(2, Some(uniform(0x2000, 0, 256, 1024)))
            .unwrap();

        let err = binder
            .update_bindings(&mut ops, &mut frame, &layout)
            .unwrap_err();
        assert!(matches!(
            err,
            GalError::SparseBindings {
                category: BindingCategory::Buffers,
                slot: 1,
                count: 3,
            }
        ));
        // The buffers bit stays dirty so a corrected bind set retries.
        assert!(binder.dirty().contains(DirtyFlags::BUFFERS));

        binder
            .bind_uniform_buffer(1, Some(uniform(0x3000, 0, 256, 1024)))
            .unwrap();
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        assert!(!binder.dirty().contains(DirtyFlags::BUFFERS));
    }

    #[test]
    fn compute_sparse_storage_rejected_dense_accepted() {
        let mut binder = TableBinder::new(BindPoint::Compute);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        let storage = |address| StorageBufferBinding {
            base: uniform(address, 0, 64, 1024),
            element_stride: 16,
        };
        binder.bind_storage_buffer(0, Some(storage(0x1000))).unwrap();
        binder.bind_storage_buffer(2, Some(storage(0x2000))).unwrap();
        let err = binder
            .update_bindings(&mut ops, &mut frame, &layout)
            .unwrap_err();
        assert!(matches!(
            err,
            GalError::SparseBindings {
                category: BindingCategory::Uavs,
                slot: 1,
                ..
            }
        ));

        binder.bind_storage_buffer(1, Some(storage(0x3000))).unwrap();
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        assert!(!binder.dirty().contains(DirtyFlags::UAVS));
    }

    #[test]
    fn graphics_sparse_buffers_fill_nulls() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        binder
            .bind_uniform_buffer(0, Some(uniform(0x1000, 0, 256, 1024)))
            .unwrap();
        binder
            .bind_uniform_buffer(2, Some(uniform(0x2000, 0, 256, 1024)))
            .unwrap();
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();

        let nulls = ops
            .writes
            .iter()
            .filter(|w| matches!(w, TableWrite::NullUniform { .. }))
            .count();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn root_slots_bypass_the_table() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout {
            root_buffer_slots: 2,
            ..Default::default()
        };

        binder
            .bind_uniform_buffer(0, Some(uniform(0x1000, 0, 256, 1024)))
            .unwrap();
        binder
            .bind_uniform_buffer(1, Some(uniform(0x2000, 256, 256, 1024)))
            .unwrap();
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();

        assert_eq!(ops.root_buffers, vec![(0, 0x1000), (1, 0x2000 + 256)]);
        assert!(!ops
            .tables
            .iter()
            .any(|(category, _)| *category == BindingCategory::Buffers));
    }

    #[test]
    fn misaligned_uniform_rejected_at_bind() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let err = binder
            .bind_uniform_buffer(0, Some(uniform(0x1000, 100, 256, 1024)))
            .unwrap_err();
        assert!(matches!(err, GalError::InvalidBinding(_)));
    }

    #[test]
    fn oversized_uniform_rejected_at_bind() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let err = binder
            .bind_uniform_buffer(
                0,
                Some(uniform(0x1000, 0, MAX_UNIFORM_BUFFER_RANGE + 256, 1 << 20)),
            )
            .unwrap_err();
        assert!(matches!(err, GalError::InvalidBinding(_)));
    }

    #[test]
    fn storage_stride_misalignment_rejected() {
        let mut binder = TableBinder::new(BindPoint::Compute);
        let err = binder
            .bind_storage_buffer(
                0,
                Some(StorageBufferBinding {
                    base: uniform(0x1000, 10, 64, 1024),
                    element_stride: 16,
                }),
            )
            .unwrap_err();
        assert!(matches!(err, GalError::InvalidBinding(_)));
    }

    #[test]
    fn reset_marks_everything_dirty() {
        let mut binder = TableBinder::new(BindPoint::Graphics);
        let mut ops = RecordingOps::default();
        let mut frame = frame();
        let layout = BindingLayout::default();

        binder.bind_texture(0, Some(TextureHandle(1)));
        binder.update_bindings(&mut ops, &mut frame, &layout).unwrap();
        assert!(binder.dirty().is_empty());

        binder.reset();
        assert_eq!(binder.dirty(), DirtyFlags::all());
    }
}

//! Slot tables holding pending resource bindings between draws.

use crate::types::{BufferHandle, GpuAddress};

/// Fixed-capacity table of optional bindings with a high-water count.
///
/// `count` tracks one past the highest occupied slot so flushes only touch
/// the used prefix of the table. Clearing the topmost slot trims the count
/// back down past any trailing gaps.
#[derive(Clone, Debug)]
pub struct SlotTable<T: Copy, const N: usize> {
    slots: [Option<T>; N],
    count: u32,
}

impl<T: Copy, const N: usize> Default for SlotTable<T, N> {
    fn default() -> Self {
        Self {
            slots: [None; N],
            count: 0,
        }
    }
}

impl<T: Copy, const N: usize> SlotTable<T, N> {
    /// Writes or clears one slot. Out-of-range slots are ignored.
    ///
    /// Returns `true` if the table changed.
    pub fn set(&mut self, slot: u32, value: Option<T>) -> bool {
        let Some(entry) = self.slots.get_mut(slot as usize) else {
            return false;
        };
        *entry = value;
        if value.is_some() {
            self.count = self.count.max(slot + 1);
        } else if slot + 1 == self.count {
            self.count = self
                .slots[..slot as usize]
                .iter()
                .rposition(Option::is_some)
                .map_or(0, |i| i as u32 + 1);
        }
        true
    }

    /// The binding at `slot`, if any.
    pub fn get(&self, slot: u32) -> Option<T> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// One past the highest occupied slot.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The first unoccupied slot below `count`, if the prefix is sparse.
    pub fn first_gap(&self) -> Option<u32> {
        self.slots[..self.count as usize]
            .iter()
            .position(Option::is_none)
            .map(|i| i as u32)
    }

    /// Clears every slot.
    pub fn clear(&mut self) {
        self.slots = [None; N];
        self.count = 0;
    }
}

/// A buffer region bound as a uniform or storage resource.
#[derive(Clone, Copy, Debug)]
pub struct BufferBinding {
    pub buffer: BufferHandle,
    /// GPU virtual address of the buffer start (not the bound offset).
    pub address: GpuAddress,
    /// Byte offset of the bound region.
    pub offset: u64,
    /// Byte size of the bound region.
    pub size: u64,
    /// Total byte length of the underlying buffer.
    pub len: u64,
}

impl BufferBinding {
    /// GPU address of the bound region.
    pub fn region_address(&self) -> GpuAddress {
        self.address + self.offset
    }
}

/// A buffer region bound for unordered (read/write) access.
#[derive(Clone, Copy, Debug)]
pub struct StorageBufferBinding {
    pub base: BufferBinding,
    /// Stride of one element as declared by the shader.
    pub element_stride: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TextureHandle;

    fn table() -> SlotTable<TextureHandle, 8> {
        SlotTable::default()
    }

    #[test]
    fn count_tracks_highest_slot() {
        let mut t = table();
        assert_eq!(t.count(), 0);
        t.set(0, Some(TextureHandle(1)));
        t.set(4, Some(TextureHandle(2)));
        assert_eq!(t.count(), 5);
        assert_eq!(t.get(4), Some(TextureHandle(2)));
    }

    #[test]
    fn clearing_top_slot_trims_count() {
        let mut t = table();
        t.set(0, Some(TextureHandle(1)));
        t.set(2, Some(TextureHandle(2)));
        t.set(5, Some(TextureHandle(3)));
        t.set(5, None);
        assert_eq!(t.count(), 3);
        t.set(2, None);
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn clearing_interior_slot_keeps_count() {
        let mut t = table();
        t.set(0, Some(TextureHandle(1)));
        t.set(3, Some(TextureHandle(2)));
        t.set(0, None);
        assert_eq!(t.count(), 4);
        assert_eq!(t.first_gap(), Some(0));
    }

    #[test]
    fn dense_prefix_has_no_gap() {
        let mut t = table();
        t.set(0, Some(TextureHandle(1)));
        t.set(1, Some(TextureHandle(2)));
        t.set(2, Some(TextureHandle(3)));
        assert_eq!(t.first_gap(), None);
    }

    #[test]
    fn out_of_range_slot_is_ignored() {
        let mut t = table();
        assert!(!t.set(8, Some(TextureHandle(1))));
        assert_eq!(t.count(), 0);
    }
}

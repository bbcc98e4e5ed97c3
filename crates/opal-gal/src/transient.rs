//! Per-frame transient descriptor pages with fence-gated reclamation.
//!
//! Descriptors written during a frame live in pages owned by that frame's
//! allocator. A page retired at frame end is tagged with the frame's fence
//! value and only returns to the free list once the GPU has signalled past
//! that value.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::GalConfig;
use crate::error::{GalError, Result};
use crate::types::{DescriptorIndex, PageId};

/// A GPU progress fence with a monotonically increasing completed value.
pub trait GpuFence {
    /// The highest fence value the GPU has signalled.
    fn completed_value(&self) -> u64;
}

/// Backend hook that creates native descriptor pages.
pub trait DescriptorPageSource {
    /// Creates a native page holding `capacity` descriptors.
    fn create_page(&mut self, capacity: u32) -> Result<PageId>;

    /// Recycles a reclaimed page before it receives new allocations.
    fn reset_page(&mut self, page: PageId) -> Result<()> {
        let _ = page;
        Ok(())
    }
}

/// One transient descriptor page and its allocation cursor.
#[derive(Clone, Debug)]
pub struct TransientPage {
    pub id: PageId,
    pub capacity: u32,
    used: u32,
    /// Fence value the GPU must reach before this page may be reused.
    fence_value: u64,
}

/// A contiguous run of descriptors inside one page.
#[derive(Clone, Copy, Debug)]
pub struct DescriptorRange {
    pub page: PageId,
    pub first: u32,
    pub count: u32,
}

impl DescriptorRange {
    /// The i-th descriptor of the range.
    pub fn index(&self, i: u32) -> DescriptorIndex {
        debug_assert!(i < self.count);
        DescriptorIndex {
            page: self.page,
            offset: self.first + i,
        }
    }
}

/// Allocates descriptor ranges out of transient pages for one frame context.
pub struct TransientAllocator {
    descriptors_per_page: u32,
    max_pages: u32,
    /// Pages ready for reuse.
    free: Vec<TransientPage>,
    /// Pages receiving allocations this frame, most recent last.
    active: Vec<TransientPage>,
    /// Pages awaiting GPU completion, tagged with their fence values.
    retired: Vec<TransientPage>,
    total_pages: u32,
}

impl TransientAllocator {
    pub fn new(config: &GalConfig) -> Self {
        Self {
            descriptors_per_page: config.descriptors_per_page,
            max_pages: config.max_heap_pages,
            free: Vec::new(),
            active: Vec::new(),
            retired: Vec::new(),
            total_pages: 0,
        }
    }

    /// Ensures at least one free page exists so the first frame's
    /// allocations never create pools mid-recording.
    ///
    /// Called by frame drivers when `preallocate_pages` is configured.
    pub fn preallocate(&mut self, source: &mut dyn DescriptorPageSource) -> Result<()> {
        let page = self.acquire_page(source, 0)?;
        self.free.push(page);
        Ok(())
    }

    /// Reclaims retired pages whose fences have completed, then readies the
    /// allocator for a new frame.
    pub fn begin_frame(&mut self, completed_fence: u64) {
        let before = self.retired.len();
        let mut i = 0;
        while i < self.retired.len() {
            if self.retired[i].fence_value <= completed_fence {
                let mut page = self.retired.swap_remove(i);
                page.used = 0;
                page.fence_value = 0;
                self.free.push(page);
            } else {
                i += 1;
            }
        }
        if before != self.retired.len() {
            trace!(
                reclaimed = before - self.retired.len(),
                still_pending = self.retired.len(),
                "reclaimed transient pages"
            );
        }
    }

    /// Allocates `count` contiguous descriptors, opening a new page when the
    /// current one cannot satisfy the request.
    pub fn allocate(
        &mut self,
        source: &mut dyn DescriptorPageSource,
        count: u32,
    ) -> Result<DescriptorRange> {
        if count > self.descriptors_per_page {
            return Err(GalError::InvalidBinding(format!(
                "descriptor range of {count} exceeds page capacity {}",
                self.descriptors_per_page
            )));
        }
        if let Some(page) = self.active.last_mut() {
            if page.used + count <= page.capacity {
                let first = page.used;
                page.used += count;
                return Ok(DescriptorRange {
                    page: page.id,
                    first,
                    count,
                });
            }
        }
        let mut page = self.acquire_page(source, count)?;
        let range = DescriptorRange {
            page: page.id,
            first: 0,
            count,
        };
        page.used = count;
        self.active.push(page);
        Ok(range)
    }

    /// Retires every active page under `fence_value`. Pages stay retired
    /// until a later `begin_frame` observes the fence completed.
    pub fn end_frame(&mut self, fence_value: u64) {
        for mut page in self.active.drain(..) {
            page.fence_value = fence_value;
            self.retired.push(page);
        }
    }

    /// Total pages ever created.
    pub fn page_count(&self) -> u32 {
        self.total_pages
    }

    fn acquire_page(
        &mut self,
        source: &mut dyn DescriptorPageSource,
        needed: u32,
    ) -> Result<TransientPage> {
        if let Some(page) = self.free.pop() {
            source.reset_page(page.id)?;
            return Ok(page);
        }
        if self.total_pages >= self.max_pages {
            return Err(GalError::DescriptorHeapExhausted {
                needed,
                max_pages: self.max_pages,
            });
        }
        let id = source.create_page(self.descriptors_per_page)?;
        self.total_pages += 1;
        debug!(
            page = id.0,
            total = self.total_pages,
            capacity = self.descriptors_per_page,
            "created transient descriptor page"
        );
        Ok(TransientPage {
            id,
            capacity: self.descriptors_per_page,
            used: 0,
            fence_value: 0,
        })
    }
}

/// Per-frame state a command encoder draws descriptors from.
pub struct FrameContext {
    pub allocator: TransientAllocator,
    pub fence: Rc<dyn GpuFence>,
    /// Fence value that will be signalled when this frame's work completes.
    pub fence_value: u64,
}

impl FrameContext {
    pub fn new(config: &GalConfig, fence: Rc<dyn GpuFence>) -> Self {
        Self {
            allocator: TransientAllocator::new(config),
            fence,
            fence_value: 0,
        }
    }

    /// Like [`FrameContext::new`], but creates the first descriptor page up
    /// front when [`GalConfig::preallocate_pages`] is set, so the first
    /// frame never creates native heaps mid-recording.
    pub fn with_preallocation(
        config: &GalConfig,
        fence: Rc<dyn GpuFence>,
        source: &mut dyn DescriptorPageSource,
    ) -> Result<Self> {
        let mut frame = Self::new(config, fence);
        if config.preallocate_pages {
            frame.allocator.preallocate(source)?;
        }
        Ok(frame)
    }

    /// Reclaims completed pages and records the fence value this frame will
    /// signal.
    pub fn begin_frame(&mut self, fence_value: u64) {
        self.fence_value = fence_value;
        let completed = self.fence.completed_value();
        self.allocator.begin_frame(completed);
    }

    /// Retires the frame's pages under its fence value.
    pub fn end_frame(&mut self) {
        self.allocator.end_frame(self.fence_value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingSource {
        next: u32,
    }

    impl DescriptorPageSource for CountingSource {
        fn create_page(&mut self, _capacity: u32) -> Result<PageId> {
            let id = PageId(self.next);
            self.next += 1;
            Ok(id)
        }
    }

    struct TestFence {
        value: Cell<u64>,
    }

    impl GpuFence for TestFence {
        fn completed_value(&self) -> u64 {
            self.value.get()
        }
    }

    fn config(pages: u32, per_page: u32) -> GalConfig {
        GalConfig {
            descriptors_per_page: per_page,
            max_heap_pages: pages,
            ..Default::default()
        }
    }

    #[test]
    fn allocations_pack_into_one_page() {
        let mut alloc = TransientAllocator::new(&config(4, 16));
        let mut source = CountingSource { next: 0 };
        let a = alloc.allocate(&mut source, 8).unwrap();
        let b = alloc.allocate(&mut source, 8).unwrap();
        assert_eq!(a.page, b.page);
        assert_eq!(b.first, 8);
        assert_eq!(alloc.page_count(), 1);
    }

    #[test]
    fn overflow_opens_new_page() {
        let mut alloc = TransientAllocator::new(&config(4, 16));
        let mut source = CountingSource { next: 0 };
        alloc.allocate(&mut source, 12).unwrap();
        let b = alloc.allocate(&mut source, 8).unwrap();
        assert_eq!(b.first, 0);
        assert_eq!(alloc.page_count(), 2);
    }

    #[test]
    fn page_held_until_fence_completes() {
        let mut alloc = TransientAllocator::new(&config(16, 16));
        let mut source = CountingSource { next: 0 };
        let a = alloc.allocate(&mut source, 16).unwrap();
        alloc.end_frame(1);

        // Fence not yet signalled, the page must not be reused.
        alloc.begin_frame(0);
        let b = alloc.allocate(&mut source, 16).unwrap();
        assert_ne!(a.page, b.page);
        alloc.end_frame(2);

        // Fence value 1 completed, the first page comes back.
        alloc.begin_frame(1);
        let c = alloc.allocate(&mut source, 16).unwrap();
        assert_eq!(c.page, a.page);
    }

    #[test]
    fn ceiling_reached_reports_exhaustion() {
        let mut alloc = TransientAllocator::new(&config(2, 8));
        let mut source = CountingSource { next: 0 };
        alloc.allocate(&mut source, 8).unwrap();
        alloc.allocate(&mut source, 8).unwrap();
        let err = alloc.allocate(&mut source, 4).unwrap_err();
        assert!(matches!(
            err,
            GalError::DescriptorHeapExhausted { max_pages: 2, .. }
        ));
    }

    #[test]
    fn oversized_range_rejected() {
        let mut alloc = TransientAllocator::new(&config(2, 8));
        let mut source = CountingSource { next: 0 };
        assert!(alloc.allocate(&mut source, 9).is_err());
    }

    #[test]
    fn preallocation_creates_the_first_page_early() {
        let mut alloc = TransientAllocator::new(&config(4, 16));
        let mut source = CountingSource { next: 0 };
        alloc.preallocate(&mut source).unwrap();
        assert_eq!(alloc.page_count(), 1);

        // The pre-created page serves the first allocation.
        alloc.allocate(&mut source, 8).unwrap();
        assert_eq!(alloc.page_count(), 1);
    }

    #[test]
    fn preallocate_flag_drives_page_creation() {
        let fence = Rc::new(TestFence {
            value: Cell::new(0),
        });
        let mut source = CountingSource { next: 0 };

        let eager = GalConfig {
            preallocate_pages: true,
            ..config(4, 16)
        };
        let frame =
            FrameContext::with_preallocation(&eager, fence.clone(), &mut source).unwrap();
        assert_eq!(frame.allocator.page_count(), 1);

        let lazy = GalConfig {
            preallocate_pages: false,
            ..config(4, 16)
        };
        let frame = FrameContext::with_preallocation(&lazy, fence, &mut source).unwrap();
        assert_eq!(frame.allocator.page_count(), 0);
    }

    #[test]
    fn frame_context_cycles_pages_through_fence() {
        let fence = Rc::new(TestFence {
            value: Cell::new(0),
        });
        let mut frame = FrameContext::new(&config(8, 8), fence.clone());
        let mut source = CountingSource { next: 0 };

        frame.begin_frame(1);
        let a = frame.allocator.allocate(&mut source, 8).unwrap();
        frame.end_frame();

        // GPU has not reached fence 1 yet.
        frame.begin_frame(2);
        let b = frame.allocator.allocate(&mut source, 8).unwrap();
        assert_ne!(a.page, b.page);
        frame.end_frame();

        fence.value.set(2);
        frame.begin_frame(3);
        frame.allocator.allocate(&mut source, 8).unwrap();
        assert_eq!(frame.allocator.page_count(), 2);
    }
}

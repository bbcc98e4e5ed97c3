//! Timeline-semaphore-backed frame fence.

use crate::error::Result;
use ash::vk;
use opal_gal::GpuFence;
use std::cell::Cell;
use std::sync::Arc;

/// GPU progress fence backed by a Vulkan timeline semaphore.
///
/// Queue submissions signal increasing values on the semaphore; the
/// transient allocator polls [`GpuFence::completed_value`] to decide when
/// retired descriptor pages are safe to reuse.
pub struct TimelineFence {
    device: Arc<ash::Device>,
    semaphore: vk::Semaphore,
    last_observed: Cell<u64>,
}

impl TimelineFence {
    /// Create a timeline semaphore starting at zero.
    ///
    /// # Safety
    /// The device must be valid and outlive the fence.
    pub unsafe fn new(device: Arc<ash::Device>) -> Result<Self> {
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);

        let semaphore = device.create_semaphore(&create_info, None)?;
        Ok(Self {
            device,
            semaphore,
            last_observed: Cell::new(0),
        })
    }

    /// The raw semaphore, for queue submission signal operations.
    pub fn semaphore(&self) -> vk::Semaphore {
        self.semaphore
    }

    /// Block until the semaphore reaches `value`.
    pub fn wait(&self, value: u64, timeout_ns: u64) -> Result<()> {
        let semaphores = [self.semaphore];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) }?;
        Ok(())
    }
}

impl GpuFence for TimelineFence {
    fn completed_value(&self) -> u64 {
        match unsafe { self.device.get_semaphore_counter_value(self.semaphore) } {
            Ok(value) => {
                self.last_observed.set(value);
                value
            }
            Err(err) => {
                // A failed query must not unblock page reuse early, so the
                // last observed value stands.
                tracing::error!("timeline semaphore query failed: {err}");
                self.last_observed.get()
            }
        }
    }
}

impl Drop for TimelineFence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

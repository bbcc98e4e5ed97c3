//! Runtime tuning knobs for per-frame descriptor management.

use tracing::warn;

/// Configuration for frame pacing and transient descriptor heaps.
///
/// Construct with [`GalConfig::default`] and override fields, then pass the
/// result of [`GalConfig::validated`] to the backend context builder.
#[derive(Clone, Debug)]
pub struct GalConfig {
    /// Number of frames the CPU may record ahead of the GPU.
    pub max_frames_in_flight: u32,
    /// Descriptors per transient heap page.
    pub descriptors_per_page: u32,
    /// Ceiling on live transient pages across all frames.
    pub max_heap_pages: u32,
    /// Allocate one page per frame context up front rather than on demand.
    pub preallocate_pages: bool,
    /// Variant-cache population above which a pipeline logs a thrash warning.
    pub variant_warn_threshold: usize,
}

impl Default for GalConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 3,
            descriptors_per_page: 1024,
            max_heap_pages: 16,
            preallocate_pages: false,
            variant_warn_threshold: 8,
        }
    }
}

impl GalConfig {
    /// Clamps out-of-range values back into supported bounds, logging each
    /// adjustment.
    #[must_use]
    pub fn validated(mut self) -> Self {
        if !(2..=4).contains(&self.max_frames_in_flight) {
            let clamped = self.max_frames_in_flight.clamp(2, 4);
            warn!(
                requested = self.max_frames_in_flight,
                clamped, "max_frames_in_flight out of range"
            );
            self.max_frames_in_flight = clamped;
        }
        if self.descriptors_per_page == 0 {
            warn!("descriptors_per_page must be nonzero, using 1024");
            self.descriptors_per_page = 1024;
        }
        if self.max_heap_pages < self.max_frames_in_flight {
            warn!(
                requested = self.max_heap_pages,
                clamped = self.max_frames_in_flight,
                "max_heap_pages below frame count"
            );
            self.max_heap_pages = self.max_frames_in_flight;
        }
        if self.variant_warn_threshold == 0 {
            self.variant_warn_threshold = 1;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_unchanged() {
        let config = GalConfig::default();
        let validated = config.clone().validated();
        assert_eq!(validated.max_frames_in_flight, config.max_frames_in_flight);
        assert_eq!(validated.descriptors_per_page, config.descriptors_per_page);
        assert_eq!(validated.max_heap_pages, config.max_heap_pages);
    }

    #[test]
    fn clamps_frames_in_flight() {
        let config = GalConfig {
            max_frames_in_flight: 1,
            ..Default::default()
        };
        assert_eq!(config.validated().max_frames_in_flight, 2);

        let config = GalConfig {
            max_frames_in_flight: 9,
            ..Default::default()
        };
        assert_eq!(config.validated().max_frames_in_flight, 4);
    }

    #[test]
    fn page_ceiling_covers_frame_count() {
        let config = GalConfig {
            max_heap_pages: 1,
            ..Default::default()
        };
        let validated = config.validated();
        assert_eq!(validated.max_heap_pages, validated.max_frames_in_flight);
    }

    #[test]
    fn zero_descriptors_per_page_reset_to_default() {
        let config = GalConfig {
            descriptors_per_page: 0,
            ..Default::default()
        };
        assert_eq!(config.validated().descriptors_per_page, 1024);
    }
}

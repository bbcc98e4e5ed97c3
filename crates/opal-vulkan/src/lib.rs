//! Vulkan backend for the Opal graphics abstraction layer.
//!
//! This crate provides:
//! - Vulkan instance and device management (headless by default)
//! - Timeline-semaphore frame fences for transient page reclamation
//! - Descriptor pool pages and table materialization
//! - Graphics pipeline creation with dynamic rendering
//! - Command recording behind the portable ops traits

pub mod context;
pub mod descriptors;
pub mod error;
pub mod fence;
pub mod format;
pub mod instance;
pub mod pipeline;
pub mod recorder;

pub use context::{VulkanContext, VulkanContextBuilder};
pub use descriptors::{BindingModel, PagePool, ROOT_BUFFER_SLOTS};
pub use error::{Result, VkError};
pub use fence::TimelineFence;
pub use pipeline::{PipelineRegistry, VulkanPipelineFactory};
pub use recorder::{ResourceTable, VulkanRecorder};

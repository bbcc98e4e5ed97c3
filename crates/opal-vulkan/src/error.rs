//! Vulkan backend error types.

use ash::vk;
use opal_gal::GalError;
use thiserror::Error;

/// Vulkan backend errors.
#[derive(Error, Debug)]
pub enum VkError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Shader compilation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<VkError> for GalError {
    fn from(err: VkError) -> Self {
        match err {
            VkError::ShaderCompilation(msg) => Self::Reflection(msg),
            VkError::PipelineCreation(msg) => Self::PipelineCreation(msg),
            VkError::ResourceNotFound(msg) => Self::InvalidBinding(msg),
            other => Self::Device(other.to_string()),
        }
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, VkError>;

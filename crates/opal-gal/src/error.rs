//! GAL error types.

use crate::types::BindingCategory;
use thiserror::Error;

/// Errors produced by the binding and pipeline-state core.
#[derive(Error, Debug)]
pub enum GalError {
    /// The per-frame descriptor allocator hit its page ceiling.
    #[error("descriptor heap exhausted: needed {needed} descriptors with {max_pages} page ceiling reached")]
    DescriptorHeapExhausted { needed: u32, max_pages: u32 },

    /// A descriptor-table-bound category has a gap in its bound slots.
    #[error("sparse {category:?} bindings: slot {slot} is unbound but {count} slots are in use")]
    SparseBindings {
        category: BindingCategory,
        slot: u32,
        count: u32,
    },

    /// A recorded binding fails native validation rules.
    #[error("invalid binding: {0}")]
    InvalidBinding(String),

    /// Native pipeline object creation failed.
    #[error("pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Shader reflection data could not be resolved.
    #[error("shader reflection error: {0}")]
    Reflection(String),

    /// An operation was issued in a state that cannot accept it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Backend device failure.
    #[error("device error: {0}")]
    Device(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GalError>;

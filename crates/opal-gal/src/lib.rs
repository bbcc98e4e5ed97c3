//! Backend-agnostic GPU binding and pipeline-state management.
//!
//! This crate holds the state machines every backend shares: dirty-tracked
//! resource binding, transient descriptor paging with fence-gated reuse,
//! and render pipeline variant caching keyed by draw-time attachment
//! formats. Backends plug in through the small ops traits
//! ([`TableOps`], [`DirectOps`], [`RenderOps`], [`PipelineFactory`]) and
//! own all native object lifetimes.

pub mod adapter;
pub mod binder;
pub mod bindings;
pub mod config;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod reflection;
pub mod transient;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{CommandAdapter, DirectOps, StateMask};
pub use binder::{BindPoint, ResourceBinder, TableBinder, TableOps};
pub use bindings::{BufferBinding, SlotTable, StorageBufferBinding};
pub use config::GalConfig;
pub use encoder::{CommandEncoder, RenderOps, RenderPassDesc};
pub use error::{GalError, Result};
pub use pipeline::{
    DynamicPipelineState, PipelineFactory, RenderPipelineDesc, RenderPipelineState,
    VertexAttribute,
};
pub use reflection::{BindingLayout, ShaderReflection};
pub use transient::{
    DescriptorPageSource, DescriptorRange, FrameContext, GpuFence, TransientAllocator,
    TransientPage,
};
pub use types::*;

//! Render pipeline state with draw-time variant caching.
//!
//! Native pipeline objects bake in attachment formats and fixed-function
//! state that the binding API only learns at draw time. Each logical
//! pipeline therefore owns a cache of native variants keyed by that dynamic
//! state, building new ones on miss.

use std::cell::RefCell;

use hashbrown::HashMap;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::reflection::{BindingLayout, ShaderReflection};
use crate::types::{
    CompareOp, CullMode, PipelineHandle, PrimitiveTopology, ShaderModuleHandle, TextureFormat,
    VertexFormat, WindingMode, MAX_COLOR_ATTACHMENTS,
};

/// Draw-time state that selects a native pipeline variant.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct DynamicPipelineState {
    pub color_formats: [TextureFormat; MAX_COLOR_ATTACHMENTS],
    pub depth_format: TextureFormat,
    pub topology: PrimitiveTopology,
    pub depth_write_enabled: bool,
    pub depth_compare: CompareOp,
}

/// One vertex attribute declaration.
#[derive(Clone, Copy, Debug)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u32,
    pub buffer_index: u32,
    pub location: u32,
}

/// Immutable description of a logical render pipeline.
#[derive(Clone, Debug)]
pub struct RenderPipelineDesc {
    pub debug_name: String,
    pub vertex_shader: ShaderModuleHandle,
    pub fragment_shader: Option<ShaderModuleHandle>,
    pub vertex_attributes: Vec<VertexAttribute>,
    pub vertex_strides: Vec<u32>,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub winding: WindingMode,
    pub blend_enabled: bool,
    pub reflection: ShaderReflection,
    pub layout: BindingLayout,
}

/// Backend hook that builds native pipeline objects.
pub trait PipelineFactory {
    /// Compiles a native pipeline for `desc` specialized to `dynamic`.
    fn create_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
        dynamic: &DynamicPipelineState,
    ) -> Result<PipelineHandle>;
}

/// A logical render pipeline and its cache of native variants.
///
/// The cache uses interior mutability so lookups work through shared
/// references; the type is intentionally not `Sync`, matching the
/// one-thread-per-encoder recording model.
pub struct RenderPipelineState {
    desc: RenderPipelineDesc,
    /// State the base variant was compiled against.
    base_state: DynamicPipelineState,
    base: PipelineHandle,
    variants: RefCell<HashMap<DynamicPipelineState, PipelineHandle>>,
    variant_warn_threshold: usize,
}

impl RenderPipelineState {
    /// Builds the base variant eagerly so the common path never compiles at
    /// draw time.
    pub fn new(
        factory: &mut dyn PipelineFactory,
        desc: RenderPipelineDesc,
        initial_state: DynamicPipelineState,
        variant_warn_threshold: usize,
    ) -> Result<Self> {
        let base = factory.create_pipeline(&desc, &initial_state)?;
        debug!(pipeline = %desc.debug_name, "created base pipeline variant");
        Ok(Self {
            desc,
            base_state: initial_state,
            base,
            variants: RefCell::new(HashMap::new()),
            variant_warn_threshold,
        })
    }

    pub fn desc(&self) -> &RenderPipelineDesc {
        &self.desc
    }

    pub fn layout(&self) -> &BindingLayout {
        &self.desc.layout
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.desc.reflection
    }

    /// Number of variants beyond the base.
    pub fn variant_count(&self) -> usize {
        self.variants.borrow().len()
    }

    /// Whether another pipeline shares this pipeline's binding layout, so
    /// bindings recorded against one remain valid for the other.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        let a = &self.desc.layout;
        let b = &other.desc.layout;
        a.texture_table_count == b.texture_table_count
            && a.sampler_table_count == b.sampler_table_count
            && a.buffer_table_count == b.buffer_table_count
            && a.root_buffer_slots == b.root_buffer_slots
            && a.uav_table_count == b.uav_table_count
    }

    /// The native pipeline for `state`, building a variant on first use.
    ///
    /// Variant creation failure logs the error and falls back to the base
    /// variant rather than failing the draw; the failure is not cached, so
    /// a later fix (driver update, shader reload) gets retried.
    pub fn pipeline_for(&self, factory: &mut dyn PipelineFactory, state: &DynamicPipelineState) -> PipelineHandle {
        if *state == self.base_state {
            return self.base;
        }
        if let Some(handle) = self.variants.borrow().get(state) {
            return *handle;
        }
        match factory.create_pipeline(&self.desc, state) {
            Ok(handle) => {
                let mut variants = self.variants.borrow_mut();
                variants.insert(*state, handle);
                if variants.len() > self.variant_warn_threshold {
                    warn!(
                        pipeline = %self.desc.debug_name,
                        variants = variants.len(),
                        "pipeline variant cache growing, check render target format churn"
                    );
                }
                handle
            }
            Err(err) => {
                error!(
                    pipeline = %self.desc.debug_name,
                    %err,
                    "pipeline variant creation failed, falling back to base variant"
                );
                self.base
            }
        }
    }
}

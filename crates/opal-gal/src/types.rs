//! Handles, formats, and binding-table constants shared by every backend.

use bitflags::bitflags;

/// Maximum texture binding slots per stage (t0-t15 style register spaces).
pub const MAX_TEXTURE_SLOTS: usize = 16;
/// Maximum sampler binding slots per stage.
pub const MAX_SAMPLER_SLOTS: usize = 16;
/// Maximum uniform/storage buffer binding slots (b0-b30 / u0-u30 style).
pub const MAX_BUFFER_SLOTS: usize = 31;
/// Maximum vertex buffer bindings.
pub const MAX_VERTEX_BUFFERS: usize = 16;
/// Maximum simultaneous color attachments.
pub const MAX_COLOR_ATTACHMENTS: usize = 4;

/// Native constant-buffer address alignment (D3D12 CBV rule; Vulkan
/// minUniformBufferOffsetAlignment is at most this on desktop hardware).
pub const UNIFORM_BUFFER_ALIGNMENT: u64 = 256;
/// Largest uniform buffer range a single descriptor may cover.
pub const MAX_UNIFORM_BUFFER_RANGE: u64 = 65536;

/// GPU virtual address.
pub type GpuAddress = u64;

/// Opaque, non-owning texture handle. Ownership of the native object stays
/// with the application-level resource wrapper.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TextureHandle(pub u64);

/// Opaque, non-owning sampler handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SamplerHandle(pub u64);

/// Opaque, non-owning buffer handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct BufferHandle(pub u64);

/// Opaque handle to a native pipeline object owned by a backend factory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PipelineHandle(pub u64);

/// Opaque handle to a compiled shader module owned by a backend.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ShaderModuleHandle(pub u64);

/// Identifier of one transient descriptor page.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PageId(pub u32);

/// Location of a single descriptor inside a transient page.
///
/// Valid only until the owning page is recycled; the binder refreshes these
/// on every flush.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct DescriptorIndex {
    pub page: PageId,
    pub offset: u32,
}

/// Render target and depth formats understood by the binding core.
///
/// Deliberately a small subset; backends own the full capability tables.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum TextureFormat {
    /// No attachment.
    #[default]
    Invalid,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    Rgba16Float,
    Rgba32Float,
    Depth16Unorm,
    Depth32Float,
    Depth24Stencil8,
}

impl TextureFormat {
    /// Whether this format carries a depth aspect.
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth32Float | Self::Depth24Stencil8
        )
    }

    /// Whether this format carries a stencil aspect.
    pub const fn is_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8)
    }
}

/// Primitive assembly topology.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Depth/stencil comparison function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CompareOp {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Face culling mode.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CullMode {
    Disabled,
    Front,
    #[default]
    Back,
}

/// Front-face winding order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum WindingMode {
    Clockwise,
    #[default]
    CounterClockwise,
}

/// Index buffer element width.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IndexFormat {
    U16,
    U32,
}

/// Vertex attribute formats (the subset the sample content exercises).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VertexFormat {
    Float1,
    Float2,
    Float3,
    Float4,
    UByte4Norm,
    Half2,
    Half4,
    UInt1,
}

/// One resource-binding category tracked by the binders.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BindingCategory {
    Textures,
    Samplers,
    Buffers,
    Uavs,
}

bitflags! {
    /// Dirty bits, one per binding category.
    ///
    /// A bit is set whenever any slot in that category is written and is
    /// cleared only after a successful flush of that category.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct DirtyFlags: u8 {
        const TEXTURES = 1 << 0;
        const SAMPLERS = 1 << 1;
        const BUFFERS = 1 << 2;
        const UAVS = 1 << 3;
    }
}

impl DirtyFlags {
    /// The dirty bit for one category.
    pub const fn of(category: BindingCategory) -> Self {
        match category {
            BindingCategory::Textures => Self::TEXTURES,
            BindingCategory::Samplers => Self::SAMPLERS,
            BindingCategory::Buffers => Self::BUFFERS,
            BindingCategory::Uavs => Self::UAVS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_format_classification() {
        assert!(TextureFormat::Depth32Float.is_depth());
        assert!(TextureFormat::Depth24Stencil8.is_depth());
        assert!(TextureFormat::Depth24Stencil8.is_stencil());
        assert!(!TextureFormat::Bgra8Srgb.is_depth());
        assert!(!TextureFormat::Depth32Float.is_stencil());
    }

    #[test]
    fn dirty_flag_per_category() {
        let mut flags = DirtyFlags::empty();
        flags |= DirtyFlags::of(BindingCategory::Samplers);
        assert!(flags.contains(DirtyFlags::SAMPLERS));
        assert!(!flags.contains(DirtyFlags::TEXTURES));
    }
}

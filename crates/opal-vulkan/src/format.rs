//! Conversions between portable enums and Vulkan equivalents.

use ash::vk;
use opal_gal::{
    CompareOp, CullMode, IndexFormat, PrimitiveTopology, TextureFormat, VertexFormat, WindingMode,
};

/// Maps a portable texture format to its Vulkan format.
///
/// `Invalid` maps to `UNDEFINED`, which is what dynamic rendering expects
/// for unused attachment slots.
pub fn texture_format(format: TextureFormat) -> vk::Format {
    match format {
        TextureFormat::Invalid => vk::Format::UNDEFINED,
        TextureFormat::R8Unorm => vk::Format::R8_UNORM,
        TextureFormat::Rg8Unorm => vk::Format::R8G8_UNORM,
        TextureFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        TextureFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        TextureFormat::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        TextureFormat::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        TextureFormat::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        TextureFormat::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        TextureFormat::Depth16Unorm => vk::Format::D16_UNORM,
        TextureFormat::Depth32Float => vk::Format::D32_SFLOAT,
        TextureFormat::Depth24Stencil8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub fn primitive_topology(topology: PrimitiveTopology) -> vk::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
        PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
        PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn compare_op(op: CompareOp) -> vk::CompareOp {
    match op {
        CompareOp::Never => vk::CompareOp::NEVER,
        CompareOp::Less => vk::CompareOp::LESS,
        CompareOp::Equal => vk::CompareOp::EQUAL,
        CompareOp::LessEqual => vk::CompareOp::LESS_OR_EQUAL,
        CompareOp::Greater => vk::CompareOp::GREATER,
        CompareOp::NotEqual => vk::CompareOp::NOT_EQUAL,
        CompareOp::GreaterEqual => vk::CompareOp::GREATER_OR_EQUAL,
        CompareOp::Always => vk::CompareOp::ALWAYS,
    }
}

pub fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::Disabled => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
    }
}

pub fn front_face(winding: WindingMode) -> vk::FrontFace {
    match winding {
        WindingMode::Clockwise => vk::FrontFace::CLOCKWISE,
        WindingMode::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub fn index_type(format: IndexFormat) -> vk::IndexType {
    match format {
        IndexFormat::U16 => vk::IndexType::UINT16,
        IndexFormat::U32 => vk::IndexType::UINT32,
    }
}

pub fn vertex_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float1 => vk::Format::R32_SFLOAT,
        VertexFormat::Float2 => vk::Format::R32G32_SFLOAT,
        VertexFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
        VertexFormat::UByte4Norm => vk::Format::R8G8B8A8_UNORM,
        VertexFormat::Half2 => vk::Format::R16G16_SFLOAT,
        VertexFormat::Half4 => vk::Format::R16G16B16A16_SFLOAT,
        VertexFormat::UInt1 => vk::Format::R32_UINT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_format_is_undefined() {
        assert_eq!(texture_format(TextureFormat::Invalid), vk::Format::UNDEFINED);
    }

    #[test]
    fn depth_formats_map_to_depth_vk_formats() {
        assert_eq!(
            texture_format(TextureFormat::Depth32Float),
            vk::Format::D32_SFLOAT
        );
        assert_eq!(
            texture_format(TextureFormat::Depth24Stencil8),
            vk::Format::D24_UNORM_S8_UINT
        );
    }
}

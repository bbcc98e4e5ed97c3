//! Shader binding reflection: name-to-slot maps and declared table sizes.

use hashbrown::HashMap;

/// Name-to-slot maps recovered from shader reflection.
///
/// Backends populate these from their native reflection path; tests build
/// them by hand with the `with_*` methods.
#[derive(Clone, Debug, Default)]
pub struct ShaderReflection {
    textures: HashMap<String, u32>,
    samplers: HashMap<String, u32>,
    buffers: HashMap<String, u32>,
}

impl ShaderReflection {
    #[must_use]
    pub fn with_texture(mut self, name: &str, slot: u32) -> Self {
        self.textures.insert(name.to_owned(), slot);
        self
    }

    #[must_use]
    pub fn with_sampler(mut self, name: &str, slot: u32) -> Self {
        self.samplers.insert(name.to_owned(), slot);
        self
    }

    #[must_use]
    pub fn with_buffer(mut self, name: &str, slot: u32) -> Self {
        self.buffers.insert(name.to_owned(), slot);
        self
    }

    pub fn texture_slot(&self, name: &str) -> Option<u32> {
        self.textures.get(name).copied()
    }

    pub fn sampler_slot(&self, name: &str) -> Option<u32> {
        self.samplers.get(name).copied()
    }

    pub fn buffer_slot(&self, name: &str) -> Option<u32> {
        self.buffers.get(name).copied()
    }
}

/// Per-category resource counts a pipeline declares.
///
/// Nonzero table counts fix the descriptor range sizes at flush time;
/// unbound slots inside a declared range are filled with null descriptors.
#[derive(Clone, Copy, Debug, Default)]
pub struct BindingLayout {
    /// SRV slots the shaders declare.
    pub texture_table_count: u32,
    /// Sampler slots the shaders declare.
    pub sampler_table_count: u32,
    /// Uniform buffer slots declared beyond the root slots.
    pub buffer_table_count: u32,
    /// Leading uniform buffer slots bound directly as root descriptors
    /// instead of through the descriptor table.
    pub root_buffer_slots: u32,
    /// UAV slots the shaders declare.
    pub uav_table_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_lookup_per_category() {
        let reflection = ShaderReflection::default()
            .with_texture("albedo", 0)
            .with_sampler("albedoSampler", 0)
            .with_buffer("perFrame", 1);
        assert_eq!(reflection.texture_slot("albedo"), Some(0));
        assert_eq!(reflection.sampler_slot("albedoSampler"), Some(0));
        assert_eq!(reflection.buffer_slot("perFrame"), Some(1));
        assert_eq!(reflection.texture_slot("normal"), None);
    }
}

//! Descriptor set layouts, pipeline layout, and transient pool pages.
//!
//! Each binding category gets its own descriptor set with a single
//! variable-count, partially-bound array binding: set 0 sampled images,
//! set 1 samplers, set 2 uniform buffers, set 3 storage buffers. The two
//! leading uniform slots bypass sets entirely and travel as push-constant
//! buffer device addresses.

use crate::error::Result;
use ash::vk;
use opal_gal::{BindingCategory, MAX_BUFFER_SLOTS, MAX_SAMPLER_SLOTS, MAX_TEXTURE_SLOTS};

/// Uniform slots bound as push-constant device addresses.
pub const ROOT_BUFFER_SLOTS: u32 = 2;

/// Set index for a binding category.
pub const fn set_index(category: BindingCategory) -> u32 {
    match category {
        BindingCategory::Textures => 0,
        BindingCategory::Samplers => 1,
        BindingCategory::Buffers => 2,
        BindingCategory::Uavs => 3,
    }
}

pub const fn descriptor_type(category: BindingCategory) -> vk::DescriptorType {
    match category {
        BindingCategory::Textures => vk::DescriptorType::SAMPLED_IMAGE,
        BindingCategory::Samplers => vk::DescriptorType::SAMPLER,
        BindingCategory::Buffers => vk::DescriptorType::UNIFORM_BUFFER,
        BindingCategory::Uavs => vk::DescriptorType::STORAGE_BUFFER,
    }
}

const fn max_slots(category: BindingCategory) -> u32 {
    match category {
        BindingCategory::Textures => MAX_TEXTURE_SLOTS as u32,
        BindingCategory::Samplers => MAX_SAMPLER_SLOTS as u32,
        BindingCategory::Buffers | BindingCategory::Uavs => MAX_BUFFER_SLOTS as u32,
    }
}

const CATEGORIES: [BindingCategory; 4] = [
    BindingCategory::Textures,
    BindingCategory::Samplers,
    BindingCategory::Buffers,
    BindingCategory::Uavs,
];

/// Shared binding model: one pipeline layout for every pipeline and
/// recorder in a context.
pub struct BindingModel {
    set_layouts: [vk::DescriptorSetLayout; 4],
    pipeline_layout: vk::PipelineLayout,
    default_sampler: vk::Sampler,
}

impl BindingModel {
    /// Create the set layouts and pipeline layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let mut set_layouts = [vk::DescriptorSetLayout::null(); 4];
        for category in CATEGORIES {
            set_layouts[set_index(category) as usize] =
                create_category_layout(device, category)?;
        }

        let push_range = vk::PushConstantRange::default()
            .stage_flags(
                vk::ShaderStageFlags::VERTEX
                    | vk::ShaderStageFlags::FRAGMENT
                    | vk::ShaderStageFlags::COMPUTE,
            )
            .offset(0)
            .size(ROOT_BUFFER_SLOTS * 8);

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_range));

        let pipeline_layout = device.create_pipeline_layout(&layout_info, None)?;

        // Fallback for sampler slots left unbound.
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT);
        let default_sampler = device.create_sampler(&sampler_info, None)?;

        Ok(Self {
            set_layouts,
            pipeline_layout,
            default_sampler,
        })
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn set_layout(&self, category: BindingCategory) -> vk::DescriptorSetLayout {
        self.set_layouts[set_index(category) as usize]
    }

    pub fn default_sampler(&self) -> vk::Sampler {
        self.default_sampler
    }

    /// Destroy all layouts.
    ///
    /// # Safety
    /// The device must be valid and no pipelines using the layout may be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_sampler(self.default_sampler, None);
        device.destroy_pipeline_layout(self.pipeline_layout, None);
        for layout in self.set_layouts {
            device.destroy_descriptor_set_layout(layout, None);
        }
    }
}

unsafe fn create_category_layout(
    device: &ash::Device,
    category: BindingCategory,
) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding::default()
        .binding(0)
        .descriptor_type(descriptor_type(category))
        .descriptor_count(max_slots(category))
        .stage_flags(vk::ShaderStageFlags::ALL);

    let binding_flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND
        | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT;
    let mut flags_info = vk::DescriptorSetLayoutBindingFlagsCreateInfo::default()
        .binding_flags(std::slice::from_ref(&binding_flags));

    let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
        .bindings(std::slice::from_ref(&binding))
        .push_next(&mut flags_info);

    let layout = device.create_descriptor_set_layout(&layout_info, None)?;
    Ok(layout)
}

/// One transient descriptor page backed by a Vulkan descriptor pool.
pub struct PagePool {
    pool: vk::DescriptorPool,
}

impl PagePool {
    /// Create a pool able to hold `capacity` descriptors of any category.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, capacity: u32) -> Result<Self> {
        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLED_IMAGE)
                .descriptor_count(capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::SAMPLER)
                .descriptor_count(capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(capacity),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(capacity),
        ];

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity)
            .pool_sizes(&pool_sizes);

        let pool = device.create_descriptor_pool(&create_info, None)?;
        Ok(Self { pool })
    }

    /// Allocate one variable-count set for a category table.
    ///
    /// # Safety
    /// The device must be valid and the layout must come from the shared
    /// binding model.
    pub unsafe fn allocate_set(
        &self,
        device: &ash::Device,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<vk::DescriptorSet> {
        let counts = [count];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default()
                .descriptor_counts(&counts);

        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts)
            .push_next(&mut variable_info);

        let sets = device.allocate_descriptor_sets(&alloc_info)?;
        Ok(sets[0])
    }

    /// Reset the pool, freeing all sets.
    ///
    /// # Safety
    /// The device must be valid and no set from this pool may be in use.
    pub unsafe fn reset(&self, device: &ash::Device) -> Result<()> {
        device.reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        Ok(())
    }

    /// Destroy the pool.
    ///
    /// # Safety
    /// The device must be valid and the pool must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

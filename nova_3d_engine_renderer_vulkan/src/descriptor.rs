//! DescriptorAllocator - binding-frequency-tiered descriptor pools
//!
//! Each category (per-frame global data, per-material, per-object) gets its
//! own fixed-capacity `vk::DescriptorPool` and `vk::DescriptorSetLayout`,
//! so resetting a fast-churning category never invalidates slow-churning
//! sets. Pool capacity is chosen up front and never grows; exhausting it is
//! a fatal configuration error, not a trigger for reallocation.

use std::sync::Arc;

use ash::vk;
use rustc_hash::FxHashMap;

use nova_3d_engine::nova3d::{Error, Result};
use nova_3d_engine::renderer::{BindingSlot, CategoryDesc, ResourceKind, ShaderStageFlags};
use nova_3d_engine::{engine_debug, engine_err};

use crate::context::GpuContext;

/// Hard upper bound on any single category's pool capacity.
pub const MAX_SETS_PER_CATEGORY: u32 = 1024;

/// Capacity accounting for one category's pool.
///
/// Kept separate from the Vulkan pool so the no-partial-allocation and
/// reset-restores-capacity rules are enforced (and testable) independently
/// of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PoolBudget {
    capacity: u32,
    allocated: u32,
}

impl PoolBudget {
    pub(crate) fn new(capacity: u32) -> Self {
        Self {
            capacity,
            allocated: 0,
        }
    }

    /// Number of sets still available.
    pub(crate) fn available(&self) -> u32 {
        self.capacity - self.allocated
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Reserve `count` sets; either all are reserved or none.
    pub(crate) fn try_reserve(&mut self, count: u32) -> bool {
        if count <= self.available() {
            self.allocated += count;
            true
        } else {
            false
        }
    }

    /// Return every set to the pool in one step.
    pub(crate) fn reset(&mut self) {
        self.allocated = 0;
    }
}

/// Opaque key identifying a descriptor category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CategoryId(u32);

/// A resource reference written into one binding slot of a set.
#[derive(Debug, Clone, Copy)]
pub enum BindingResource {
    /// Uniform buffer region with a fixed offset
    UniformBuffer {
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    },
    /// Uniform buffer whose offset is supplied at bind time
    DynamicUniformBuffer { buffer: vk::Buffer, range: u64 },
    /// Sampled image in `SHADER_READ_ONLY_OPTIMAL` with its sampler
    CombinedImageSampler {
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl BindingResource {
    fn kind(&self) -> ResourceKind {
        match self {
            BindingResource::UniformBuffer { .. } => ResourceKind::UniformBuffer,
            BindingResource::DynamicUniformBuffer { .. } => ResourceKind::DynamicUniformBuffer,
            BindingResource::CombinedImageSampler { .. } => ResourceKind::CombinedImageSampler,
        }
    }
}

/// One binding update: which slot, and what resource now backs it.
#[derive(Debug, Clone, Copy)]
pub struct BindingWrite {
    pub binding: u32,
    pub resource: BindingResource,
}

struct Category {
    name: String,
    layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    bindings: Vec<BindingSlot>,
    budget: PoolBudget,
}

/// Allocator for shader-binding descriptor sets, tiered by binding
/// frequency.
pub struct DescriptorAllocator {
    ctx: Arc<GpuContext>,
    categories: FxHashMap<CategoryId, Category>,
    next_id: u32,
}

impl DescriptorAllocator {
    pub fn new(ctx: Arc<GpuContext>) -> Self {
        Self {
            ctx,
            categories: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Declare a category: its binding layout and its pool capacity.
    ///
    /// Capacity must be sized for the maximum expected number of concurrent
    /// sets; it is bounded by [`MAX_SETS_PER_CATEGORY`] and never grows.
    pub fn create_category(&mut self, desc: &CategoryDesc) -> Result<CategoryId> {
        if desc.bindings.is_empty() {
            return Err(Error::ConfigurationError(format!(
                "category '{}' declares no bindings",
                desc.name
            )));
        }
        if desc.max_sets == 0 || desc.max_sets > MAX_SETS_PER_CATEGORY {
            return Err(Error::ConfigurationError(format!(
                "category '{}' capacity {} out of range 1..={}",
                desc.name, desc.max_sets, MAX_SETS_PER_CATEGORY
            )));
        }
        for (i, slot) in desc.bindings.iter().enumerate() {
            if desc.bindings[..i].iter().any(|s| s.binding == slot.binding) {
                return Err(Error::ConfigurationError(format!(
                    "category '{}' declares binding index {} twice",
                    desc.name, slot.binding
                )));
            }
        }

        let layout_bindings: Vec<_> = desc
            .bindings
            .iter()
            .map(|slot| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(slot.binding)
                    .descriptor_type(kind_to_vk(slot.kind))
                    .descriptor_count(1)
                    .stage_flags(stages_to_vk(slot.stages))
            })
            .collect();

        let layout_info =
            vk::DescriptorSetLayoutCreateInfo::default().bindings(&layout_bindings);

        let layout = unsafe {
            self.ctx
                .device
                .create_descriptor_set_layout(&layout_info, None)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to create set layout for category '{}': {:?}",
                        desc.name,
                        e
                    )
                })?
        };

        // Every set holds one descriptor per slot, so each descriptor type
        // needs slot-count * max_sets entries in the pool.
        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for slot in &desc.bindings {
            let ty = kind_to_vk(slot.kind);
            if let Some(existing) = pool_sizes.iter_mut().find(|p| p.ty == ty) {
                existing.descriptor_count += desc.max_sets;
            } else {
                pool_sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: desc.max_sets,
                });
            }
        }

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(desc.max_sets);

        let pool = unsafe {
            match self.ctx.device.create_descriptor_pool(&pool_info, None) {
                Ok(pool) => pool,
                Err(e) => {
                    self.ctx.device.destroy_descriptor_set_layout(layout, None);
                    return Err(engine_err!(
                        "nova3d::vulkan",
                        "Failed to create descriptor pool for category '{}': {:?}",
                        desc.name,
                        e
                    ));
                }
            }
        };

        let id = CategoryId(self.next_id);
        self.next_id += 1;
        self.categories.insert(
            id,
            Category {
                name: desc.name.clone(),
                layout,
                pool,
                bindings: desc.bindings.clone(),
                budget: PoolBudget::new(desc.max_sets),
            },
        );

        engine_debug!(
            "nova3d::vulkan",
            "Created descriptor category '{}' ({} bindings, {} sets)",
            desc.name,
            desc.bindings.len(),
            desc.max_sets
        );
        Ok(id)
    }

    /// The category's set layout, for building pipeline layouts.
    ///
    /// Identically defined layouts are compatible, so any of several
    /// same-shaped categories can stand in for the others here.
    pub fn layout(&self, category: CategoryId) -> Result<vk::DescriptorSetLayout> {
        Ok(self.category(category)?.layout)
    }

    /// Number of sets still available in the category's pool.
    pub fn available_sets(&self, category: CategoryId) -> Result<u32> {
        Ok(self.category(category)?.budget.available())
    }

    /// Draw `count` sets from the category's pool.
    ///
    /// Insufficient remaining capacity fails with
    /// `Error::DescriptorCapacityExceeded` and allocates nothing; the pool
    /// size was chosen up front and exhaustion is a configuration fault.
    pub fn allocate_sets(
        &mut self,
        category: CategoryId,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let cat = self.categories.get_mut(&category).ok_or_else(|| {
            Error::ConfigurationError(format!("unknown descriptor category {:?}", category))
        })?;

        if count > cat.budget.available() {
            return Err(Error::DescriptorCapacityExceeded {
                category: cat.name.clone(),
                requested: count,
                available: cat.budget.available(),
            });
        }

        let layouts = vec![cat.layout; count as usize];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(cat.pool)
            .set_layouts(&layouts);

        let sets = unsafe {
            self.ctx
                .device
                .allocate_descriptor_sets(&alloc_info)
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Descriptor set allocation failed for category '{}': {:?}",
                        cat.name,
                        e
                    )
                })?
        };

        let reserved = cat.budget.try_reserve(count);
        debug_assert!(reserved);

        Ok(sets)
    }

    /// Update a set's bindings to point at specific resources.
    ///
    /// Every write must target a slot the category declared, with a
    /// matching resource kind; the declared layout is the contract with the
    /// compiled shader.
    pub fn write_bindings(
        &self,
        category: CategoryId,
        set: vk::DescriptorSet,
        writes: &[BindingWrite],
    ) -> Result<()> {
        let cat = self.category(category)?;

        for write in writes {
            let slot = cat
                .bindings
                .iter()
                .find(|s| s.binding == write.binding)
                .ok_or_else(|| {
                    Error::ConfigurationError(format!(
                        "category '{}' has no binding index {}",
                        cat.name, write.binding
                    ))
                })?;
            if slot.kind != write.resource.kind() {
                return Err(Error::ConfigurationError(format!(
                    "category '{}' binding {} is {:?}, write supplies {:?}",
                    cat.name,
                    write.binding,
                    slot.kind,
                    write.resource.kind()
                )));
            }
        }

        // Info structs must stay at stable addresses while the write array
        // references them, so collect them all before building the writes.
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for write in writes {
            match write.resource {
                BindingResource::UniformBuffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer,
                    offset,
                    range,
                }),
                BindingResource::DynamicUniformBuffer { buffer, range } => {
                    buffer_infos.push(vk::DescriptorBufferInfo {
                        buffer,
                        offset: 0,
                        range,
                    })
                }
                BindingResource::CombinedImageSampler { view, sampler } => {
                    image_infos.push(vk::DescriptorImageInfo {
                        sampler,
                        image_view: view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    })
                }
            }
        }

        let mut vk_writes = Vec::with_capacity(writes.len());
        let mut next_buffer = 0;
        let mut next_image = 0;
        for write in writes {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .descriptor_type(kind_to_vk(write.resource.kind()));
            let vk_write = match write.resource {
                BindingResource::UniformBuffer { .. }
                | BindingResource::DynamicUniformBuffer { .. } => {
                    let info = std::slice::from_ref(&buffer_infos[next_buffer]);
                    next_buffer += 1;
                    base.buffer_info(info)
                }
                BindingResource::CombinedImageSampler { .. } => {
                    let info = std::slice::from_ref(&image_infos[next_image]);
                    next_image += 1;
                    base.image_info(info)
                }
            };
            vk_writes.push(vk_write);
        }

        unsafe {
            self.ctx.device.update_descriptor_sets(&vk_writes, &[]);
        }
        Ok(())
    }

    /// Recycle every set in the category back to its pool in one O(1)
    /// operation.
    ///
    /// Existing set handles become undefined and must be rewritten before
    /// use; the pool's capacity is fully restored. Intended for
    /// frame-scoped categories only, once the guarding fence has signaled.
    pub fn reset_category(&mut self, category: CategoryId) -> Result<()> {
        let cat = self.categories.get_mut(&category).ok_or_else(|| {
            Error::ConfigurationError(format!("unknown descriptor category {:?}", category))
        })?;

        unsafe {
            self.ctx
                .device
                .reset_descriptor_pool(cat.pool, vk::DescriptorPoolResetFlags::empty())
                .map_err(|e| {
                    engine_err!(
                        "nova3d::vulkan",
                        "Failed to reset descriptor pool for category '{}': {:?}",
                        cat.name,
                        e
                    )
                })?;
        }
        cat.budget.reset();
        Ok(())
    }

    fn category(&self, category: CategoryId) -> Result<&Category> {
        self.categories.get(&category).ok_or_else(|| {
            Error::ConfigurationError(format!("unknown descriptor category {:?}", category))
        })
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        unsafe {
            for cat in self.categories.values() {
                self.ctx.device.destroy_descriptor_pool(cat.pool, None);
                self.ctx
                    .device
                    .destroy_descriptor_set_layout(cat.layout, None);
            }
        }
    }
}

fn kind_to_vk(kind: ResourceKind) -> vk::DescriptorType {
    match kind {
        ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ResourceKind::DynamicUniformBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        ResourceKind::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

fn stages_to_vk(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut flags = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        flags |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        flags |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        flags |= vk::ShaderStageFlags::COMPUTE;
    }
    flags
}

#[cfg(test)]
#[path = "descriptor_tests.rs"]
mod tests;

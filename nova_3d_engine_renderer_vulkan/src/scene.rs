//! Scene resource set
//!
//! An ordered collection of drawables, each owning its vertex buffer, index
//! buffer, and material binding. Insertion order determines draw order.

use std::sync::Arc;

use ash::vk;

use nova_3d_engine::nova3d::{Error, Result};

use crate::allocator::{AllocatedBuffer, AllocatedImage};
use crate::context::GpuContext;

/// Index of a material in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaterialId(usize);

/// Index of a drawable in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawableId(usize);

/// A texture bound as a long-lived material descriptor set.
///
/// The set comes from the material category and stays valid for the
/// material's lifetime; it is never touched by per-frame resets.
pub struct Material {
    ctx: Arc<GpuContext>,
    // Kept alive for the view's sake; the descriptor set references both.
    _image: AllocatedImage,
    view: vk::ImageView,
    sampler: vk::Sampler,
    pub(crate) descriptor_set: vk::DescriptorSet,
}

impl Material {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        image: AllocatedImage,
        view: vk::ImageView,
        sampler: vk::Sampler,
        descriptor_set: vk::DescriptorSet,
    ) -> Self {
        Self {
            ctx,
            _image: image,
            view,
            sampler,
            descriptor_set,
        }
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        unsafe {
            self.ctx.device.destroy_sampler(self.sampler, None);
            self.ctx.device.destroy_image_view(self.view, None);
        }
    }
}

/// One drawable entry: geometry buffers plus a material reference.
pub struct Drawable {
    pub(crate) name: String,
    pub(crate) vertex_buffer: AllocatedBuffer,
    pub(crate) index_buffer: AllocatedBuffer,
    pub(crate) index_count: u32,
    pub(crate) material: MaterialId,
}

impl Drawable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// The scene's GPU resource set.
#[derive(Default)]
pub struct Scene {
    drawables: Vec<Drawable>,
    materials: Vec<Material>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub(crate) fn add_drawable(&mut self, drawable: Drawable) -> Result<DrawableId> {
        if drawable.material.0 >= self.materials.len() {
            return Err(Error::ConfigurationError(format!(
                "drawable '{}' references unknown material {:?}",
                drawable.name, drawable.material
            )));
        }
        self.drawables.push(drawable);
        Ok(DrawableId(self.drawables.len() - 1))
    }

    pub(crate) fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    /// Drawables in draw order.
    pub fn drawables(&self) -> &[Drawable] {
        &self.drawables
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }
}

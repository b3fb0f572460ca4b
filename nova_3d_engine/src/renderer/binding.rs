//! Shader binding layout descriptions
//!
//! A descriptor category is a binding-frequency tier (per-frame,
//! per-material, per-object) with its own pool budget. Its layout is an
//! ordered list of binding slots that must match the compiled shader's
//! expectations bit-for-bit: binding indices are positional, not named.

bitflags::bitflags! {
    /// Shader stages that may access a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShaderStageFlags: u32 {
        const VERTEX = 1;
        const FRAGMENT = 1 << 1;
        const COMPUTE = 1 << 2;
    }
}

/// Resource kind bound at a descriptor slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Uniform buffer with a fixed offset
    UniformBuffer,
    /// Uniform buffer whose offset is supplied at bind time; sizes must be
    /// padded to the device's uniform-offset alignment
    DynamicUniformBuffer,
    /// Sampled image paired with its sampler
    CombinedImageSampler,
}

/// One slot of a category's binding layout.
#[derive(Debug, Clone)]
pub struct BindingSlot {
    /// Binding index as declared in the shader
    pub binding: u32,
    /// Kind of resource bound at this slot
    pub kind: ResourceKind,
    /// Stages that read the binding
    pub stages: ShaderStageFlags,
}

/// Description of a descriptor category.
///
/// Pool capacity is chosen up front for the maximum expected number of
/// concurrent sets; pools never grow.
#[derive(Debug, Clone)]
pub struct CategoryDesc {
    /// Human-readable category name, used in diagnostics
    pub name: String,
    /// Ordered binding slots shared by every set of the category
    pub bindings: Vec<BindingSlot>,
    /// Maximum number of sets the category's pool can hold
    pub max_sets: u32,
}

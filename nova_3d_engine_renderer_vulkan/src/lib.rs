/*!
# Nova 3D Engine - Vulkan Renderer Backend

Vulkan implementation of the Nova3D rendering engine core.

This crate provides the concrete GPU resource lifecycle and frame
orchestration behind the `nova_3d_engine` trait seam, using the Ash library
for Vulkan bindings and gpu-allocator for device-memory suballocation:

- **GpuContext**: instance/device/queue construction and the `FrameDevice`
  synchronization implementation
- **DeviceAllocator**: buffer/image suballocation with RAII ownership of
  handle + backing allocation
- **TransferExecutor**: blocking one-shot transfer command sequences
  (copies, layout transitions, mipmap generation, staged uploads)
- **DescriptorAllocator**: binding-frequency-tiered descriptor pools
- **Swapchain**: presentation engine implementation
- **VulkanRenderer**: the frame orchestrator tying it all together
*/

mod context;
mod allocator;
mod transfer;
mod descriptor;
mod swapchain;
mod pipeline;
mod scene;
mod renderer;

#[cfg(feature = "vulkan-validation")]
mod debug;

pub use context::{GpuContext, SurfaceBundle};
pub use allocator::{AllocatedBuffer, AllocatedImage, DeviceAllocator, ImageDesc, MemoryClass};
pub use transfer::{TransferCommands, TransferExecutor};
pub use descriptor::{
    BindingResource, BindingWrite, CategoryId, DescriptorAllocator, MAX_SETS_PER_CATEGORY,
};
pub use swapchain::Swapchain;
pub use pipeline::{GraphicsPipeline, PipelineDesc, RenderPass};
pub use scene::{Drawable, DrawableId, Material, MaterialId, Scene};
pub use renderer::VulkanRenderer;

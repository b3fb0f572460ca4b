//! GPU-visible data types shared between the CPU and shaders
//!
//! These structs are uploaded into uniform and vertex buffers byte-for-byte,
//! so their layout is `#[repr(C)]` and `bytemuck`-compatible.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Per-frame camera data, bound as the per-frame uniform buffer (set 0,
/// binding 0 in the reference shader layout).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraData {
    /// World-to-view matrix
    pub view: Mat4,
    /// View-to-clip matrix
    pub projection: Mat4,
    /// Premultiplied projection * view
    pub view_projection: Mat4,
}

impl Default for CameraData {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            view_projection: Mat4::IDENTITY,
        }
    }
}

impl CameraData {
    /// Build camera data from view and projection, keeping the premultiplied
    /// matrix consistent.
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
        }
    }
}

/// Vertex layout used by the reference pipeline.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: Vec3,
    /// Object-space normal
    pub normal: Vec3,
    /// Per-vertex color
    pub color: Vec3,
    /// Texture coordinate
    pub tex_coord: Vec2,
}

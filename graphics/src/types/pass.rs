//! Per-pass state: clears, viewports and resource bindings.

use super::{BufferHandle, SamplerHandle, TextureHandle};

/// Values written to every attachment when a pass clears.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    pub color: [f32; 4],
    pub depth: f32,
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            color: [0.0, 0.0, 0.0, 0.0],
            depth: 1.0,
        }
    }
}

/// Pixel rectangle a pass renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// A resource bound to a shader slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerHandle),
}

/// A resource and the shader slot it is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub slot: u32,
    pub resource: BindingResource,
}

impl Binding {
    pub fn buffer(slot: u32, buffer: BufferHandle) -> Self {
        Self {
            slot,
            resource: BindingResource::Buffer(buffer),
        }
    }

    pub fn texture(slot: u32, texture: TextureHandle) -> Self {
        Self {
            slot,
            resource: BindingResource::Texture(texture),
        }
    }

    pub fn sampler(slot: u32, sampler: SamplerHandle) -> Self {
        Self {
            slot,
            resource: BindingResource::Sampler(sampler),
        }
    }
}

/// Counters accumulated between two submits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: u32,
    pub clears: u32,
    pub draws: u32,
}

//! Sampler types and descriptors.

/// Texture filtering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    Nearest,
    #[default]
    Linear,
}

/// Texture coordinate addressing outside `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    #[default]
    ClampToEdge,
    Repeat,
}

/// Descriptor for creating a sampler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SamplerDescriptor {
    /// Debug label for the sampler.
    pub label: Option<String>,
    /// Filter for magnification, minification and mip selection.
    pub filter: FilterMode,
    /// Addressing for all coordinates.
    pub address_mode: AddressMode,
}

impl SamplerDescriptor {
    /// Linear filtering, clamped addressing.
    pub fn linear() -> Self {
        Self::default()
    }

    /// Nearest neighbor filtering, clamped addressing.
    pub fn nearest() -> Self {
        Self {
            filter: FilterMode::Nearest,
            ..Self::default()
        }
    }

    /// Linear filtering with repeating coordinates, used for material maps.
    pub fn repeat() -> Self {
        Self {
            address_mode: AddressMode::Repeat,
            ..Self::default()
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

//! GPU texture resource.

use crate::types::{TextureDescriptor, TextureFormat, TextureHandle, TextureView};

use super::ReleaseQueue;

/// A GPU texture: one 2D image or six cube faces, each with a mip chain.
pub struct Texture {
    handle: TextureHandle,
    descriptor: TextureDescriptor,
    queue: ReleaseQueue,
}

impl Texture {
    pub(crate) fn new(handle: TextureHandle, descriptor: TextureDescriptor, queue: ReleaseQueue) -> Self {
        Self {
            handle,
            descriptor,
            queue,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.descriptor.width, self.descriptor.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn mip_levels(&self) -> u32 {
        self.descriptor.mip_levels
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Layer 0, mip 0.
    pub fn view(&self) -> TextureView {
        TextureView::whole(self.handle)
    }

    /// A single cube face or mip, for rendering into.
    pub fn layer_view(&self, layer: u32, mip: u32) -> TextureView {
        TextureView {
            texture: self.handle,
            layer,
            mip,
        }
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.queue.push(self.handle.into());
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("size", &self.size())
            .field("format", &self.descriptor.format)
            .field("dimension", &self.descriptor.dimension)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn views_address_layers_and_mips() {
        let queue = ReleaseQueue::new();
        let texture = Texture::new(
            TextureHandle::from_raw(4),
            TextureDescriptor::new_cube(64, TextureFormat::Rgba16Float).with_mips(5),
            queue.clone(),
        );
        assert_eq!(texture.view(), TextureView::whole(TextureHandle::from_raw(4)));
        let face = texture.layer_view(3, 2);
        assert_eq!((face.layer, face.mip), (3, 2));
        assert_eq!(texture.mip_levels(), 5);
        drop(texture);
        assert_eq!(queue.len(), 1);
    }
}

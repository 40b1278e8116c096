//! GPU buffer resource.

use crate::types::{BufferDescriptor, BufferHandle};

use super::ReleaseQueue;

/// A GPU buffer.
///
/// Buffers are created by [`Renderer::create_buffer`](crate::Renderer::create_buffer)
/// and written with [`Renderer::write_buffer`](crate::Renderer::write_buffer).
/// The backend handle is queued for release when the buffer is dropped.
pub struct Buffer {
    handle: BufferHandle,
    descriptor: BufferDescriptor,
    queue: ReleaseQueue,
}

impl Buffer {
    pub(crate) fn new(handle: BufferHandle, descriptor: BufferDescriptor, queue: ReleaseQueue) -> Self {
        Self {
            handle,
            descriptor,
            queue,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.queue.push(self.handle.into());
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BufferUsage, ResourceHandle};

    #[test]
    fn drop_queues_release() {
        let queue = ReleaseQueue::new();
        let buffer = Buffer::new(
            BufferHandle::from_raw(9),
            BufferDescriptor::new(1024, BufferUsage::VERTEX),
            queue.clone(),
        );
        assert_eq!(buffer.size(), 1024);
        assert!(format!("{buffer:?}").contains("1024"));
        drop(buffer);
        assert_eq!(queue.drain(), vec![ResourceHandle::Buffer(BufferHandle::from_raw(9))]);
    }
}

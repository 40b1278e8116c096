//! GPU sampler resource.

use crate::types::{SamplerDescriptor, SamplerHandle};

use super::ReleaseQueue;

/// A texture sampler.
pub struct Sampler {
    handle: SamplerHandle,
    descriptor: SamplerDescriptor,
    queue: ReleaseQueue,
}

impl Sampler {
    pub(crate) fn new(handle: SamplerHandle, descriptor: SamplerDescriptor, queue: ReleaseQueue) -> Self {
        Self {
            handle,
            descriptor,
            queue,
        }
    }

    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    pub fn descriptor(&self) -> &SamplerDescriptor {
        &self.descriptor
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.queue.push(self.handle.into());
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("filter", &self.descriptor.filter)
            .field("address_mode", &self.descriptor.address_mode)
            .finish()
    }
}

static_assertions::assert_impl_all!(Sampler: Send, Sync);

//! Deferred release of backend handles.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::ResourceHandle;

/// Shared list of handles whose owners have been dropped.
#[derive(Clone, Default)]
pub struct ReleaseQueue {
    pending: Arc<Mutex<Vec<ResourceHandle>>>,
}

impl ReleaseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, handle: ResourceHandle) {
        self.pending.lock().push(handle);
    }

    /// Takes every pending handle in drop order.
    pub fn drain(&self) -> Vec<ResourceHandle> {
        std::mem::take(&mut *self.pending.lock())
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl std::fmt::Debug for ReleaseQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseQueue")
            .field("pending", &self.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(ReleaseQueue: Send, Sync);

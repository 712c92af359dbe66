//! Deferred destruction of GPU objects.
//!
//! The GPU runs up to `frames_in_flight` frames behind the host. Dropping a
//! resource on the host therefore must not destroy it on the device: commands
//! recorded in a frame that is still executing may reference it. Destruction
//! is queued under the index of the frame in which the resource was released
//! and only runs once every frame that could have used it has completed.
//!
//! ```text
//!  frame index:   F-3   F-2   F-1    F
//!  buckets:      [..]  [..]  [..]  [..]     current = F, N = 2
//!                 ^^^^  ^^^^
//!                 flushed by flush(false): bucket <= F - N
//! ```
//!
//! The queue stores backend handles, never raw pointers. A handle destroyed
//! twice is rejected by the backend's generation check and logged.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::Mutex;

use crate::backend::{
    BufferHandle, DescriptorSetHandle, GpuBackend, PipelineHandle, SamplerHandle, SetLayoutHandle,
    TextureHandle,
};

/// A backend object awaiting destruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredResource {
    Buffer(BufferHandle),
    Texture(TextureHandle),
    Sampler(SamplerHandle),
    DescriptorSet(DescriptorSetHandle),
    SetLayout(SetLayoutHandle),
    Pipeline(PipelineHandle),
}

impl DeferredResource {
    fn destroy(self, backend: &dyn GpuBackend) {
        let result = match self {
            Self::Buffer(handle) => backend.destroy_buffer(handle),
            Self::Texture(handle) => backend.destroy_texture(handle),
            Self::Sampler(handle) => backend.destroy_sampler(handle),
            Self::DescriptorSet(handle) => backend.free_descriptor_set(handle),
            Self::SetLayout(handle) => backend.destroy_set_layout(handle),
            Self::Pipeline(handle) => backend.destroy_pipeline(handle),
        };
        if let Err(e) = result {
            log::error!("Deferred destruction of {self:?} failed: {e}");
        }
    }
}

enum Destructor {
    Resource(DeferredResource),
    Callback(Box<dyn FnOnce() + Send>),
}

impl fmt::Debug for Destructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(resource) => resource.fmt(f),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Frame-indexed queue of pending destructions.
pub struct DeletionQueue {
    buckets: Mutex<BTreeMap<u64, Vec<Destructor>>>,
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Queue a backend object released during `frame_index`.
    pub fn enqueue(&self, frame_index: u64, resource: DeferredResource) {
        log::trace!("Deferring {resource:?} from frame {frame_index}");
        self.push(frame_index, Destructor::Resource(resource));
    }

    /// Queue an arbitrary destructor released during `frame_index`.
    pub fn enqueue_fn(&self, frame_index: u64, destructor: impl FnOnce() + Send + 'static) {
        self.push(frame_index, Destructor::Callback(Box::new(destructor)));
    }

    fn push(&self, frame_index: u64, destructor: Destructor) {
        self.buckets
            .lock()
            .entry(frame_index)
            .or_default()
            .push(destructor);
    }

    /// Run destructors that are safe to run at `current_frame`.
    ///
    /// Without `immediate`, only buckets with
    /// `frame_index + frames_in_flight <= current_frame` execute, oldest bucket
    /// first and in enqueue order within a bucket. With `immediate`, every
    /// bucket executes; callers must have waited for the device to go idle.
    ///
    /// Destructors run outside the lock and may enqueue further work, which
    /// lands in its own bucket for a later flush. Returns the number of
    /// destructors executed.
    pub fn flush(
        &self,
        current_frame: u64,
        frames_in_flight: usize,
        immediate: bool,
        backend: &dyn GpuBackend,
    ) -> usize {
        let ready = {
            let mut buckets = self.buckets.lock();
            if immediate {
                std::mem::take(&mut *buckets)
            } else {
                let Some(limit) = current_frame.checked_sub(frames_in_flight as u64) else {
                    return 0;
                };
                let newer = buckets.split_off(&(limit + 1));
                std::mem::replace(&mut *buckets, newer)
            }
        };

        let mut executed = 0;
        for (frame, destructors) in ready {
            log::trace!(
                "Flushing {} deferred destructions from frame {frame}",
                destructors.len()
            );
            for destructor in destructors {
                match destructor {
                    Destructor::Resource(resource) => resource.destroy(backend),
                    Destructor::Callback(callback) => callback(),
                }
                executed += 1;
            }
        }
        executed
    }

    /// Number of destructors waiting to run.
    pub fn pending_count(&self) -> usize {
        self.buckets.lock().values().map(Vec::len).sum()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }
}

impl fmt::Debug for DeletionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeletionQueue")
            .field("pending", &self.pending_count())
            .finish()
    }
}

static_assertions::assert_impl_all!(DeletionQueue: Send, Sync);

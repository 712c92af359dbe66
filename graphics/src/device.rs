//! Graphics device.
//!
//! The [`GraphicsDevice`] owns the selected backend together with the state
//! every frame-in-flight resource depends on: the global frame index, the
//! frames-in-flight count, the deletion queue, the shader cache and the
//! sampler cache. It is shared as `Arc<GraphicsDevice>` and passed explicitly
//! to every resource and render-graph constructor.
//!
//! # Frame lifecycle
//!
//! ```text
//! begin_frame()                         end_frame(frame)
//!   │ wait on slot fence (index % N)      │ submit slot
//!   │ flush deletion queue                │ frame index += 1
//!   ▼                                     ▼
//!   [ record passes, flush writers and buffers for the current slot ]
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{create_backend, BackendType, GpuBackend, SamplerHandle};
use crate::cache::CompileCache;
use crate::deletion::{DeferredResource, DeletionQueue};
use crate::error::GraphicsError;
use crate::frame::Frame;
use crate::shader::ShaderCache;
use crate::types::SamplerDescriptor;
use crate::{frame_mark, profile_function};

/// Default number of frames the host may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Parameters for creating a [`GraphicsDevice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceParameters {
    /// Backend to create.
    pub backend: BackendType,
    /// Frames in flight (N). Must be at least 1.
    pub frames_in_flight: usize,
    /// Directory for the on-disk shader cache. `None` keeps it in memory only.
    pub shader_cache_dir: Option<PathBuf>,
    /// Debug label.
    pub label: String,
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            shader_cache_dir: None,
            label: "device".to_string(),
        }
    }
}

impl DeviceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_frames_in_flight(mut self, frames_in_flight: usize) -> Self {
        self.frames_in_flight = frames_in_flight;
        self
    }

    pub fn with_shader_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_cache_dir = Some(dir.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Parse parameters from a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, GraphicsError> {
        toml::from_str(text).map_err(|e| GraphicsError::Config(e.to_string()))
    }
}

/// The device every GPU resource and render graph is created from.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Frames are driven from one render thread;
/// the shader cache, sampler cache and deletion queue may be used from any
/// thread.
pub struct GraphicsDevice {
    label: String,
    backend: Arc<dyn GpuBackend>,
    frame_index: AtomicU64,
    frames_in_flight: AtomicUsize,
    frame_active: AtomicBool,
    deletion_queue: DeletionQueue,
    shader_cache: ShaderCache,
    samplers: CompileCache<SamplerDescriptor, SamplerHandle>,
}

impl GraphicsDevice {
    /// Create a device with the backend named in `parameters`.
    pub fn new(parameters: DeviceParameters) -> Result<Arc<Self>, GraphicsError> {
        let backend = create_backend(parameters.backend)?;
        Self::with_backend(backend, parameters)
    }

    /// Create a device over an existing backend.
    pub fn with_backend(
        backend: Arc<dyn GpuBackend>,
        parameters: DeviceParameters,
    ) -> Result<Arc<Self>, GraphicsError> {
        if parameters.frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        log::info!(
            "Creating device '{}' on {} backend with {} frames in flight",
            parameters.label,
            backend.name(),
            parameters.frames_in_flight
        );
        Ok(Arc::new(Self {
            label: parameters.label,
            backend,
            frame_index: AtomicU64::new(0),
            frames_in_flight: AtomicUsize::new(parameters.frames_in_flight),
            frame_active: AtomicBool::new(false),
            deletion_queue: DeletionQueue::new(),
            shader_cache: ShaderCache::new(parameters.shader_cache_dir),
            samplers: CompileCache::new(),
        }))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn backend(&self) -> &dyn GpuBackend {
        self.backend.as_ref()
    }

    /// Frames in flight (N).
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.load(Ordering::Acquire)
    }

    /// Global frame index, incremented once per submitted frame.
    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Acquire)
    }

    /// Frame-in-flight slot of the current frame.
    pub fn current_slot(&self) -> usize {
        (self.frame_index() % self.frames_in_flight() as u64) as usize
    }

    /// Whether a frame has begun and not yet been submitted.
    pub fn is_frame_active(&self) -> bool {
        self.frame_active.load(Ordering::Acquire)
    }

    /// Short label for log lines, e.g. `F#12/S0`.
    pub fn frame_label(&self) -> String {
        format!("F#{}/S{}", self.frame_index(), self.current_slot())
    }

    /// Begin recording the next frame.
    ///
    /// Blocks until the GPU has finished the frame that last used this slot,
    /// then runs every deferred destruction that has become safe.
    pub fn begin_frame(self: &Arc<Self>) -> Result<Frame, GraphicsError> {
        profile_function!();

        if self.frame_active.swap(true, Ordering::AcqRel) {
            return Err(GraphicsError::InvalidParameter(
                "begin_frame called while a frame is still being recorded".to_string(),
            ));
        }

        let index = self.frame_index();
        let slot = self.current_slot();
        if let Err(e) = self.backend.begin_frame(slot) {
            self.frame_active.store(false, Ordering::Release);
            return Err(e);
        }

        let destroyed = self.flush_deletions();
        if destroyed > 0 {
            log::trace!("{}: released {destroyed} deferred objects", self.frame_label());
        }

        Ok(Frame::new(Arc::clone(self), index, slot))
    }

    /// Submit `frame` and advance the global frame index.
    pub fn end_frame(&self, frame: Frame) -> Result<(), GraphicsError> {
        frame.submit()
    }

    pub(crate) fn submit_slot(&self, slot: usize) -> Result<(), GraphicsError> {
        let result = self.backend.submit_frame(slot);
        self.frame_index.fetch_add(1, Ordering::AcqRel);
        self.frame_active.store(false, Ordering::Release);
        frame_mark!();
        result
    }

    /// Queue a backend object for destruction once no in-flight frame can use it.
    pub fn defer_destroy(&self, resource: DeferredResource) {
        self.deletion_queue.enqueue(self.frame_index(), resource);
    }

    /// Queue a destructor to run once no in-flight frame can observe it.
    pub fn defer(&self, destructor: impl FnOnce() + Send + 'static) {
        self.deletion_queue.enqueue_fn(self.frame_index(), destructor);
    }

    pub fn deletion_queue(&self) -> &DeletionQueue {
        &self.deletion_queue
    }

    /// Run deferred destructions that are safe at the current frame index.
    pub fn flush_deletions(&self) -> usize {
        self.deletion_queue.flush(
            self.frame_index(),
            self.frames_in_flight(),
            false,
            self.backend.as_ref(),
        )
    }

    /// Change the number of frames in flight.
    ///
    /// Waits for the device to go idle and drains the deletion queue first.
    /// Uniform writers pick up the new count at their next flush.
    pub fn set_frames_in_flight(&self, frames_in_flight: usize) -> Result<(), GraphicsError> {
        if frames_in_flight == 0 {
            return Err(GraphicsError::InvalidParameter(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.is_frame_active() {
            return Err(GraphicsError::InvalidParameter(
                "cannot change frames in flight while recording a frame".to_string(),
            ));
        }
        self.drain()?;
        let previous = self.frames_in_flight.swap(frames_in_flight, Ordering::AcqRel);
        log::info!("Frames in flight changed from {previous} to {frames_in_flight}");
        Ok(())
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()
    }

    /// Wait for the GPU and run every deferred destruction.
    pub fn shutdown(&self) -> Result<(), GraphicsError> {
        log::info!("Shutting down device '{}'", self.label);
        self.drain()
    }

    fn drain(&self) -> Result<(), GraphicsError> {
        self.backend.wait_idle()?;
        self.deletion_queue
            .flush(self.frame_index(), self.frames_in_flight(), true, self.backend.as_ref());
        Ok(())
    }

    pub fn shader_cache(&self) -> &ShaderCache {
        &self.shader_cache
    }

    /// Shared sampler for `descriptor`, created on first use.
    pub fn sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerHandle, GraphicsError> {
        self.samplers.get_or_compile(descriptor, || {
            log::debug!("Creating sampler {descriptor:?}");
            self.backend.create_sampler(descriptor)
        })
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            log::error!("Device '{}' failed to drain on drop: {e}", self.label);
        }
        for sampler in self.samplers.drain() {
            if let Err(e) = self.backend.destroy_sampler(sampler) {
                log::warn!("Failed to destroy cached sampler: {e}");
            }
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("label", &self.label)
            .field("backend", &self.backend.name())
            .field("frame_index", &self.frame_index())
            .field("frames_in_flight", &self.frames_in_flight())
            .finish()
    }
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

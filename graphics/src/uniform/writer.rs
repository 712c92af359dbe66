//! Staged descriptor writes flushed into per-frame descriptor sets.
//!
//! A [`UniformWriter`] owns one backend descriptor set per frame in flight.
//! Writes only stage; [`UniformWriter::flush`] applies them:
//!
//! - The first flush allocates N sets and fills all of them identically.
//! - Later flushes update only the current slot, with the bindings written
//!   since the last flush plus the bindings other slots changed while this
//!   slot's set was in flight.
//! - A flush with nothing to apply issues no backend update.
//!
//! ```text
//!  write(b0) flush@S0      write(b1) flush@S1      flush@S0
//!  S0: {b0}                S0: stale {b1}          S0: {b0, b1}
//!  S1: {b0}                S1: {b0, b1}            S1: {b0, b1}
//! ```
//!
//! If the device's frames-in-flight count changes, the next flush retires
//! the old sets through the deletion queue and reseeds a fresh set per slot.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backend::{Command, DescriptorResource, DescriptorSetHandle, DescriptorWrite};
use crate::deletion::DeferredResource;
use crate::error::{fatal, GraphicsError, OrFatal};
use crate::frame::Frame;
use crate::profile_function;
use crate::resources::{Buffer, Texture};
use crate::shader::ReflectedBinding;

use super::UniformLayout;

/// A binding addressed by index or by reflected name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingRef<'a> {
    Index(u32),
    Name(&'a str),
}

impl From<u32> for BindingRef<'_> {
    fn from(index: u32) -> Self {
        Self::Index(index)
    }
}

impl<'a> From<&'a str> for BindingRef<'a> {
    fn from(name: &'a str) -> Self {
        Self::Name(name)
    }
}

impl std::fmt::Display for BindingRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Index(index) => write!(f, "#{index}"),
            Self::Name(name) => write!(f, "'{name}'"),
        }
    }
}

#[derive(Clone)]
enum BoundResource {
    Buffer {
        buffer: Arc<Buffer>,
        offset: u64,
        size: u64,
    },
    Textures(Vec<Arc<Texture>>),
}

impl BoundResource {
    /// Descriptor contents for the set used by `slot`.
    ///
    /// Multi-buffered buffers are brought up to the current frames-in-flight
    /// count first, so the captured handle is the copy that stays alive.
    fn resolve(&self, slot: usize) -> DescriptorResource {
        match self {
            Self::Buffer {
                buffer,
                offset,
                size,
            } => DescriptorResource::Buffer {
                buffer: {
                    buffer.sync_frames_in_flight();
                    buffer.handle_for_slot(slot).unwrap_or_else(|| buffer.handle())
                },
                offset: *offset,
                size: *size,
            },
            Self::Textures(textures) => DescriptorResource::Textures(
                textures.iter().map(|t| (t.handle(), t.sampler())).collect(),
            ),
        }
    }
}

/// Mutable binding instance of one [`UniformLayout`].
pub struct UniformWriter {
    layout: Arc<UniformLayout>,
    label: String,
    pending: BTreeMap<u32, BoundResource>,
    committed: BTreeMap<u32, BoundResource>,
    /// Per slot: committed bindings that slot's set has not received yet.
    stale: Vec<BTreeSet<u32>>,
    sets: Vec<DescriptorSetHandle>,
}

impl UniformWriter {
    pub fn new(layout: Arc<UniformLayout>) -> Self {
        let label = format!("set {}", layout.set());
        Self::with_label(layout, label)
    }

    pub fn with_label(layout: Arc<UniformLayout>, label: impl Into<String>) -> Self {
        Self {
            layout,
            label: label.into(),
            pending: BTreeMap::new(),
            committed: BTreeMap::new(),
            stale: Vec::new(),
            sets: Vec::new(),
        }
    }

    pub fn layout(&self) -> &Arc<UniformLayout> {
        &self.layout
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether sets exist and no writes are waiting.
    pub fn is_flushed(&self) -> bool {
        !self.sets.is_empty() && self.pending.is_empty()
    }

    /// Number of staged writes.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Descriptor set used by `slot`, once allocated.
    pub fn descriptor_set(&self, slot: usize) -> Option<DescriptorSetHandle> {
        self.sets.get(slot).copied()
    }

    /// Stage `size` bytes of `buffer` at `offset` for a buffer binding.
    ///
    /// Multi-buffered buffers bind each slot's own copy.
    pub fn write_buffer<'a>(
        &mut self,
        binding: impl Into<BindingRef<'a>>,
        buffer: &Arc<Buffer>,
        size: u64,
        offset: u64,
    ) -> &mut Self {
        let binding = binding.into();
        let target = self.binding_info(binding);
        if !target.kind.is_buffer() {
            self.misuse(
                binding,
                GraphicsError::InvalidParameter(format!(
                    "binding expects {}, got buffer '{}'",
                    target.kind,
                    buffer.label()
                )),
            );
        }
        if offset.checked_add(size).map_or(true, |end| end > buffer.size()) {
            self.misuse(
                binding,
                GraphicsError::BufferTooSmall {
                    buffer: buffer.label().to_string(),
                    required: offset.saturating_add(size),
                    available: buffer.size(),
                },
            );
        }

        let index = target.binding;
        self.pending.insert(
            index,
            BoundResource::Buffer {
                buffer: Arc::clone(buffer),
                offset,
                size,
            },
        );
        self
    }

    /// Stage one texture for an image binding.
    pub fn write_texture<'a>(
        &mut self,
        binding: impl Into<BindingRef<'a>>,
        texture: &Arc<Texture>,
    ) -> &mut Self {
        self.write_textures(binding, std::slice::from_ref(texture))
    }

    /// Stage an array of textures for an arrayed image binding.
    pub fn write_textures<'a>(
        &mut self,
        binding: impl Into<BindingRef<'a>>,
        textures: &[Arc<Texture>],
    ) -> &mut Self {
        let binding = binding.into();
        let target = self.binding_info(binding);
        if !target.kind.is_image() {
            self.misuse(
                binding,
                GraphicsError::InvalidParameter(format!(
                    "binding expects {}, got {} textures",
                    target.kind,
                    textures.len()
                )),
            );
        }
        if textures.is_empty() || textures.len() > target.count as usize {
            self.misuse(
                binding,
                GraphicsError::InvalidParameter(format!(
                    "binding holds {} textures, {} written",
                    target.count,
                    textures.len()
                )),
            );
        }

        let index = target.binding;
        self.pending
            .insert(index, BoundResource::Textures(textures.to_vec()));
        self
    }

    /// Apply staged writes to the current frame slot's descriptor set.
    pub fn flush(&mut self) {
        profile_function!();

        let device = Arc::clone(self.layout.device());
        let frames_in_flight = device.frames_in_flight();

        if self.sets.len() != frames_in_flight {
            self.reseed(frames_in_flight);
            return;
        }

        let slot = device.current_slot();
        if self.pending.is_empty() && self.stale[slot].is_empty() {
            return;
        }

        for (other, stale) in self.stale.iter_mut().enumerate() {
            if other != slot {
                stale.extend(self.pending.keys().copied());
            }
        }
        let mut bindings = std::mem::take(&mut self.stale[slot]);
        bindings.extend(self.pending.keys().copied());
        self.committed.append(&mut self.pending);

        let writes: Vec<DescriptorWrite> = bindings
            .iter()
            .filter_map(|binding| {
                self.committed.get(binding).map(|resource| DescriptorWrite {
                    binding: *binding,
                    resource: resource.resolve(slot),
                })
            })
            .collect();

        device
            .backend()
            .update_descriptor_set(self.sets[slot], &writes)
            .or_fatal(&self.context());
        log::trace!(
            "{}: writer {} updated {} bindings",
            device.frame_label(),
            self.label,
            writes.len()
        );
    }

    /// Bind the current slot's set for the draws that follow.
    ///
    /// The writer must be flushed and every binding of its layout written.
    pub fn bind(&self, frame: &mut Frame) {
        if self.sets.is_empty() {
            fatal(
                &self.context(),
                GraphicsError::InvalidParameter("bound before its first flush".to_string()),
            );
        }
        if !self.pending.is_empty() {
            fatal(
                &self.context(),
                GraphicsError::InvalidParameter(format!(
                    "bound with {} unflushed writes",
                    self.pending.len()
                )),
            );
        }
        let slot = frame.slot();
        if self.sets.len() != self.layout.device().frames_in_flight() || !self.stale[slot].is_empty()
        {
            fatal(
                &self.context(),
                GraphicsError::InvalidParameter(format!("not flushed for frame slot {slot}")),
            );
        }
        if let Some(missing) = self
            .layout
            .bindings()
            .iter()
            .find(|b| !self.committed.contains_key(&b.binding))
        {
            fatal(
                &self.context(),
                GraphicsError::MissingBinding(format!(
                    "'{}' (binding {}) was never written",
                    missing.name, missing.binding
                )),
            );
        }

        frame.record(Command::BindDescriptorSet {
            set: self.layout.set(),
            descriptor_set: self.sets[slot],
        });
    }

    fn reseed(&mut self, frames_in_flight: usize) {
        let device = Arc::clone(self.layout.device());
        if !self.sets.is_empty() {
            log::debug!(
                "Writer {} reallocating {} -> {frames_in_flight} descriptor sets",
                self.label,
                self.sets.len()
            );
        }
        self.retire_sets();
        self.committed.append(&mut self.pending);

        let backend = device.backend();
        for _ in 0..frames_in_flight {
            let set = backend
                .allocate_descriptor_set(self.layout.handle())
                .or_fatal(&self.context());
            self.sets.push(set);
        }

        if !self.committed.is_empty() {
            for (slot, set) in self.sets.iter().enumerate() {
                let writes: Vec<DescriptorWrite> = self
                    .committed
                    .iter()
                    .map(|(binding, resource)| DescriptorWrite {
                        binding: *binding,
                        resource: resource.resolve(slot),
                    })
                    .collect();
                backend
                    .update_descriptor_set(*set, &writes)
                    .or_fatal(&self.context());
            }
        }
        self.stale = vec![BTreeSet::new(); frames_in_flight];
        log::debug!(
            "Writer {} allocated {frames_in_flight} descriptor sets",
            self.label
        );
    }

    fn retire_sets(&mut self) {
        let device = self.layout.device();
        for set in self.sets.drain(..) {
            device.defer_destroy(DeferredResource::DescriptorSet(set));
        }
    }

    fn binding_info(&self, binding: BindingRef<'_>) -> ReflectedBinding {
        match self.layout.resolve(binding) {
            Some(info) => info.clone(),
            None => self.misuse(
                binding,
                GraphicsError::UnknownBinding(format!(
                    "{binding} is not in set {}",
                    self.layout.set()
                )),
            ),
        }
    }

    fn misuse(&self, binding: BindingRef<'_>, error: GraphicsError) -> ! {
        fatal(&format!("{} binding {binding}", self.context()), error)
    }

    fn context(&self) -> String {
        format!("uniform writer '{}'", self.label)
    }
}

impl Drop for UniformWriter {
    fn drop(&mut self) {
        self.retire_sets();
    }
}

impl std::fmt::Debug for UniformWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformWriter")
            .field("label", &self.label)
            .field("set", &self.layout.set())
            .field("pending", &self.pending.keys().collect::<Vec<_>>())
            .field("committed", &self.committed.keys().collect::<Vec<_>>())
            .field("sets", &self.sets.len())
            .finish()
    }
}

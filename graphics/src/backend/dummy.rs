//! Dummy GPU backend for testing and development.
//!
//! Nothing is sent to a GPU, but every object lives in a generation-checked
//! table and buffers keep real bytes, so writes, copies and read-back behave
//! like device memory. Transfers execute immediately and a submitted frame is
//! complete by the time its slot is reused. Recorded commands are kept per
//! submitted frame for inspection.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::error::GraphicsError;
use crate::types::{BufferDescriptor, SamplerDescriptor, TextureDescriptor};

use super::{
    BufferHandle, Command, DescriptorResource, DescriptorSetHandle, DescriptorWrite, GpuBackend,
    PipelineCreateInfo, PipelineHandle, SamplerHandle, SetLayoutEntry, SetLayoutHandle,
    TextureHandle,
};

/// Number of submitted frames whose commands are retained.
const RETAINED_FRAMES: usize = 16;

/// Counters of backend activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DummyStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub textures_created: u64,
    pub textures_destroyed: u64,
    pub descriptor_sets_allocated: u64,
    pub descriptor_sets_freed: u64,
    /// Calls to `update_descriptor_set`.
    pub descriptor_updates: u64,
    /// Individual binding writes across all updates.
    pub descriptor_writes: u64,
    pub buffer_copies: u64,
    pub pipelines_created: u64,
    pub frames_submitted: u64,
    /// `begin_frame` calls that found the slot's previous work still pending.
    pub fence_waits: u64,
}

struct DummyBuffer {
    descriptor: BufferDescriptor,
    data: Vec<u8>,
}

struct DummySet {
    layout: SetLayoutHandle,
    bindings: BTreeMap<u32, DescriptorResource>,
}

#[derive(Default)]
struct FrameSlot {
    recording: bool,
    pending: bool,
    commands: Vec<Command>,
}

#[derive(Default)]
struct DummyState {
    buffers: SlotMap<BufferHandle, DummyBuffer>,
    textures: SlotMap<TextureHandle, TextureDescriptor>,
    samplers: SlotMap<SamplerHandle, SamplerDescriptor>,
    layouts: SlotMap<SetLayoutHandle, Vec<SetLayoutEntry>>,
    sets: SlotMap<DescriptorSetHandle, DummySet>,
    pipelines: SlotMap<PipelineHandle, PipelineCreateInfo>,
    slots: Vec<FrameSlot>,
    submitted: VecDeque<Vec<Command>>,
    stats: DummyStats,
}

impl DummyState {
    fn buffer(&self, handle: BufferHandle) -> Result<&DummyBuffer, GraphicsError> {
        self.buffers
            .get(handle)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {handle:?}")))
    }

    fn slot(&mut self, slot: usize) -> &mut FrameSlot {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, FrameSlot::default);
        }
        &mut self.slots[slot]
    }
}

fn check_range(label: &str, offset: u64, size: u64, capacity: u64) -> Result<(), GraphicsError> {
    match offset.checked_add(size) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(GraphicsError::BufferTooSmall {
            buffer: label.to_string(),
            required: offset.saturating_add(size),
            available: capacity,
        }),
    }
}

/// Dummy GPU backend.
pub struct DummyBackend {
    state: Mutex<DummyState>,
    descriptor_set_limit: Option<usize>,
    texture_limit: Option<usize>,
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DummyState::default()),
            descriptor_set_limit: None,
            texture_limit: None,
        }
    }

    /// Limit the number of live descriptor sets, simulating pool exhaustion.
    pub fn with_descriptor_set_limit(mut self, limit: usize) -> Self {
        self.descriptor_set_limit = Some(limit);
        self
    }

    /// Limit the number of live textures, simulating running out of memory.
    pub fn with_texture_limit(mut self, limit: usize) -> Self {
        self.texture_limit = Some(limit);
        self
    }

    /// Snapshot of the activity counters.
    pub fn stats(&self) -> DummyStats {
        self.state.lock().stats
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn live_descriptor_sets(&self) -> usize {
        self.state.lock().sets.len()
    }

    pub fn live_set_layouts(&self) -> usize {
        self.state.lock().layouts.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.state.lock().pipelines.len()
    }

    /// Whether `buffer` still resolves.
    pub fn is_buffer_alive(&self, buffer: BufferHandle) -> bool {
        self.state.lock().buffers.contains_key(buffer)
    }

    pub fn is_texture_alive(&self, texture: TextureHandle) -> bool {
        self.state.lock().textures.contains_key(texture)
    }

    /// Descriptor of a live texture.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<TextureDescriptor> {
        self.state.lock().textures.get(texture).cloned()
    }

    /// Current contents of one binding of a descriptor set.
    pub fn descriptor_binding(
        &self,
        set: DescriptorSetHandle,
        binding: u32,
    ) -> Option<DescriptorResource> {
        self.state
            .lock()
            .sets
            .get(set)
            .and_then(|s| s.bindings.get(&binding).cloned())
    }

    /// Pipeline creation info of a live pipeline.
    pub fn pipeline_info(&self, pipeline: PipelineHandle) -> Option<PipelineCreateInfo> {
        self.state.lock().pipelines.get(pipeline).cloned()
    }

    /// Commands of recently submitted frames, oldest first.
    pub fn submitted_frames(&self) -> Vec<Vec<Command>> {
        self.state.lock().submitted.iter().cloned().collect()
    }

    /// Commands of the most recently submitted frame.
    pub fn last_frame(&self) -> Vec<Command> {
        self.state
            .lock()
            .submitted
            .back()
            .cloned()
            .unwrap_or_default()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferHandle, GraphicsError> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer {:?} has zero size",
                descriptor.label
            )));
        }
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {}, {:?})",
            descriptor.label,
            descriptor.size,
            descriptor.residency
        );
        let mut state = self.state.lock();
        state.stats.buffers_created += 1;
        Ok(state.buffers.insert(DummyBuffer {
            descriptor: descriptor.clone(),
            data: vec![0; descriptor.size as usize],
        }))
    }

    fn destroy_buffer(&self, buffer: BufferHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let removed = state
            .buffers
            .remove(buffer)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {buffer:?}")))?;
        log::trace!("DummyBackend: destroyed buffer {:?}", removed.descriptor.label);
        state.stats.buffers_destroyed += 1;
        Ok(())
    }

    fn write_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let target = state
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {buffer:?}")))?;
        let label = target.descriptor.label.clone().unwrap_or_default();
        check_range(&label, offset, data.len() as u64, target.descriptor.size)?;
        let start = offset as usize;
        target.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        let source = state.buffer(buffer)?;
        let label = source.descriptor.label.clone().unwrap_or_default();
        check_range(&label, offset, size, source.descriptor.size)?;
        let start = offset as usize;
        Ok(source.data[start..start + size as usize].to_vec())
    }

    fn copy_buffer(
        &self,
        src: BufferHandle,
        src_offset: u64,
        dst: BufferHandle,
        dst_offset: u64,
        size: u64,
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let bytes = {
            let source = state.buffer(src)?;
            let label = source.descriptor.label.clone().unwrap_or_default();
            check_range(&label, src_offset, size, source.descriptor.size)?;
            let start = src_offset as usize;
            source.data[start..start + size as usize].to_vec()
        };
        let target = state
            .buffers
            .get_mut(dst)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("buffer {dst:?}")))?;
        let label = target.descriptor.label.clone().unwrap_or_default();
        check_range(&label, dst_offset, size, target.descriptor.size)?;
        let start = dst_offset as usize;
        target.data[start..start + bytes.len()].copy_from_slice(&bytes);
        state.stats.buffer_copies += 1;
        Ok(())
    }

    fn create_texture(
        &self,
        descriptor: &TextureDescriptor,
    ) -> Result<TextureHandle, GraphicsError> {
        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "texture {:?} has zero extent",
                descriptor.label
            )));
        }
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}, {:?})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.format
        );
        let mut state = self.state.lock();
        if let Some(limit) = self.texture_limit {
            if state.textures.len() >= limit {
                return Err(GraphicsError::OutOfMemory(format!(
                    "texture memory exhausted ({limit} textures)"
                )));
            }
        }
        state.stats.textures_created += 1;
        Ok(state.textures.insert(descriptor.clone()))
    }

    fn destroy_texture(&self, texture: TextureHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let removed = state
            .textures
            .remove(texture)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("texture {texture:?}")))?;
        log::trace!("DummyBackend: destroyed texture {:?}", removed.label);
        state.stats.textures_destroyed += 1;
        Ok(())
    }

    fn create_sampler(
        &self,
        descriptor: &SamplerDescriptor,
    ) -> Result<SamplerHandle, GraphicsError> {
        log::trace!("DummyBackend: creating sampler {descriptor:?}");
        Ok(self.state.lock().samplers.insert(descriptor.clone()))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) -> Result<(), GraphicsError> {
        self.state
            .lock()
            .samplers
            .remove(sampler)
            .map(|_| ())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("sampler {sampler:?}")))
    }

    fn create_set_layout(
        &self,
        entries: &[SetLayoutEntry],
    ) -> Result<SetLayoutHandle, GraphicsError> {
        log::trace!("DummyBackend: creating set layout with {} bindings", entries.len());
        Ok(self.state.lock().layouts.insert(entries.to_vec()))
    }

    fn destroy_set_layout(&self, layout: SetLayoutHandle) -> Result<(), GraphicsError> {
        self.state
            .lock()
            .layouts
            .remove(layout)
            .map(|_| ())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("set layout {layout:?}")))
    }

    fn allocate_descriptor_set(
        &self,
        layout: SetLayoutHandle,
    ) -> Result<DescriptorSetHandle, GraphicsError> {
        let mut state = self.state.lock();
        if !state.layouts.contains_key(layout) {
            return Err(GraphicsError::InvalidHandle(format!("set layout {layout:?}")));
        }
        if let Some(limit) = self.descriptor_set_limit {
            if state.sets.len() >= limit {
                return Err(GraphicsError::OutOfMemory(format!(
                    "descriptor pool exhausted ({limit} sets)"
                )));
            }
        }
        state.stats.descriptor_sets_allocated += 1;
        Ok(state.sets.insert(DummySet {
            layout,
            bindings: BTreeMap::new(),
        }))
    }

    fn update_descriptor_set(
        &self,
        set: DescriptorSetHandle,
        writes: &[DescriptorWrite],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let layout = state
            .sets
            .get(set)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("descriptor set {set:?}")))?
            .layout;
        let entries = state
            .layouts
            .get(layout)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("set layout {layout:?}")))?;

        for write in writes {
            let entry = entries
                .iter()
                .find(|e| e.binding == write.binding)
                .ok_or_else(|| {
                    GraphicsError::UnknownBinding(format!("binding {} not in layout", write.binding))
                })?;
            match &write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    size,
                } => {
                    if !entry.kind.is_buffer() {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "binding {} expects {}, got a buffer",
                            write.binding, entry.kind
                        )));
                    }
                    let target = state.buffer(*buffer)?;
                    let label = target.descriptor.label.clone().unwrap_or_default();
                    check_range(&label, *offset, *size, target.descriptor.size)?;
                }
                DescriptorResource::Textures(textures) => {
                    if !entry.kind.is_image() {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "binding {} expects {}, got textures",
                            write.binding, entry.kind
                        )));
                    }
                    if textures.len() > entry.count as usize {
                        return Err(GraphicsError::InvalidParameter(format!(
                            "binding {} holds {} textures, {} written",
                            write.binding,
                            entry.count,
                            textures.len()
                        )));
                    }
                    for (texture, sampler) in textures {
                        if !state.textures.contains_key(*texture) {
                            return Err(GraphicsError::InvalidHandle(format!(
                                "texture {texture:?}"
                            )));
                        }
                        if let Some(sampler) = sampler {
                            if !state.samplers.contains_key(*sampler) {
                                return Err(GraphicsError::InvalidHandle(format!(
                                    "sampler {sampler:?}"
                                )));
                            }
                        }
                    }
                }
            }
        }

        let target = state
            .sets
            .get_mut(set)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("descriptor set {set:?}")))?;
        for write in writes {
            target.bindings.insert(write.binding, write.resource.clone());
        }
        state.stats.descriptor_updates += 1;
        state.stats.descriptor_writes += writes.len() as u64;
        Ok(())
    }

    fn free_descriptor_set(&self, set: DescriptorSetHandle) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        state
            .sets
            .remove(set)
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("descriptor set {set:?}")))?;
        state.stats.descriptor_sets_freed += 1;
        Ok(())
    }

    fn create_pipeline(&self, info: &PipelineCreateInfo) -> Result<PipelineHandle, GraphicsError> {
        let mut state = self.state.lock();
        for (set, layout) in &info.set_layouts {
            if !state.layouts.contains_key(*layout) {
                return Err(GraphicsError::InvalidHandle(format!(
                    "set layout {layout:?} for set {set} of pipeline '{}'",
                    info.label
                )));
            }
        }
        log::trace!("DummyBackend: creating {:?} pipeline '{}'", info.kind, info.label);
        state.stats.pipelines_created += 1;
        Ok(state.pipelines.insert(info.clone()))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) -> Result<(), GraphicsError> {
        self.state
            .lock()
            .pipelines
            .remove(pipeline)
            .map(|_| ())
            .ok_or_else(|| GraphicsError::InvalidHandle(format!("pipeline {pipeline:?}")))
    }

    fn begin_frame(&self, slot: usize) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let frame = state.slot(slot);
        if frame.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame slot {slot} is already recording"
            )));
        }
        let waited = frame.pending;
        frame.pending = false;
        frame.recording = true;
        frame.commands.clear();
        if waited {
            state.stats.fence_waits += 1;
        }
        Ok(())
    }

    fn record(&self, slot: usize, command: Command) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let frame = state.slot(slot);
        if !frame.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame slot {slot} is not recording"
            )));
        }
        frame.commands.push(command);
        Ok(())
    }

    fn submit_frame(&self, slot: usize) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let frame = state.slot(slot);
        if !frame.recording {
            return Err(GraphicsError::InvalidParameter(format!(
                "frame slot {slot} is not recording"
            )));
        }
        frame.recording = false;
        frame.pending = true;
        let commands = std::mem::take(&mut frame.commands);
        if state.submitted.len() == RETAINED_FRAMES {
            state.submitted.pop_front();
        }
        state.submitted.push_back(commands);
        state.stats.frames_submitted += 1;
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        for frame in &mut state.slots {
            frame.pending = false;
        }
        Ok(())
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

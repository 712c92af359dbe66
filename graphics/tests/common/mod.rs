//! Common utilities for integration tests.
//!
//! Everything runs on the dummy backend, which keeps buffer bytes, descriptor
//! set contents and the command log in memory so tests can inspect them.

#![allow(dead_code)]

use std::sync::Arc;

use inflight_graphics::backend::DescriptorResource;
use inflight_graphics::shader::{
    ReflectedBinding, ResourceKind, ShaderReflection, ShaderStage, ShaderStageFlags,
};
use inflight_graphics::{
    Buffer, BufferCreateInfo, BufferUsage, DeviceParameters, DummyBackend, GpuBackend,
    GraphicsDevice, MemoryResidency, SamplerDescriptor, Texture, TextureDescriptor,
    TextureFormat, TextureUsage, UniformWriter,
};

/// Route `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A device on a fresh dummy backend, with the backend kept for inspection.
pub struct TestContext {
    pub backend: Arc<DummyBackend>,
    pub device: Arc<GraphicsDevice>,
}

impl TestContext {
    pub fn new(frames_in_flight: usize) -> Self {
        init_logging();
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::with_backend(
            backend.clone(),
            DeviceParameters::new()
                .with_frames_in_flight(frames_in_flight)
                .with_label("test"),
        )
        .expect("dummy device");
        Self { backend, device }
    }

    /// Begin and immediately end one empty frame.
    pub fn advance_frame(&self) {
        let frame = self.device.begin_frame().expect("begin frame");
        self.device.end_frame(frame).expect("end frame");
    }

    pub fn uniform_buffer(&self, label: &str, size: u64) -> Arc<Buffer> {
        Arc::new(
            Buffer::with_info(
                &self.device,
                BufferCreateInfo::new(size, 1, BufferUsage::UNIFORM).with_label(label),
            )
            .expect("uniform buffer"),
        )
    }

    pub fn multi_buffered(&self, label: &str, size: u64, residency: MemoryResidency) -> Buffer {
        Buffer::with_info(
            &self.device,
            BufferCreateInfo::new(size, 1, BufferUsage::UNIFORM | BufferUsage::STORAGE)
                .with_label(label)
                .with_residency(residency)
                .multi_buffered(),
        )
        .expect("multi-buffered buffer")
    }

    pub fn sampled_texture(&self, label: &str) -> Arc<Texture> {
        let desc = TextureDescriptor::new_2d(
            8,
            8,
            TextureFormat::Rgba8UnormSrgb,
            TextureUsage::TEXTURE_BINDING,
        )
        .with_label(label);
        Arc::new(
            Texture::with_sampler(&self.device, desc, &SamplerDescriptor::linear())
                .expect("texture"),
        )
    }

    /// Bytes the writer's set for `slot` points at through `binding`.
    pub fn bound_bytes(&self, writer: &UniformWriter, slot: usize, binding: u32) -> Vec<u8> {
        let set = writer.descriptor_set(slot).expect("writer is flushed");
        match self.backend.descriptor_binding(set, binding) {
            Some(DescriptorResource::Buffer {
                buffer,
                offset,
                size,
            }) => self
                .backend
                .read_buffer(buffer, offset, size)
                .expect("bound buffer is alive"),
            other => panic!("binding {binding} of slot {slot} holds {other:?}"),
        }
    }
}

/// One reflected binding, as a shader stage would declare it.
pub fn binding(
    set: u32,
    index: u32,
    name: &str,
    kind: ResourceKind,
    stages: ShaderStageFlags,
    size: u64,
) -> ReflectedBinding {
    ReflectedBinding {
        name: name.to_string(),
        set,
        binding: index,
        kind,
        count: 1,
        stages,
        size,
        members: Vec::new(),
    }
}

/// Reflection of one stage declaring `bindings`.
pub fn reflection(stage: ShaderStage, bindings: Vec<ReflectedBinding>) -> ShaderReflection {
    let mut set_layouts: Vec<(u32, Vec<ReflectedBinding>)> = Vec::new();
    for binding in bindings {
        match set_layouts.iter_mut().find(|(set, _)| *set == binding.set) {
            Some((_, entries)) => entries.push(binding),
            None => set_layouts.push((binding.set, vec![binding])),
        }
    }
    set_layouts.sort_by_key(|(set, _)| *set);
    for (_, entries) in &mut set_layouts {
        entries.sort_by_key(|b| b.binding);
    }
    ShaderReflection {
        stage,
        entry_point: "main".to_string(),
        set_layouts,
        attributes: Vec::new(),
    }
}

/// A column-major 4x4 matrix as 64 bytes, every element set to `value`.
pub fn matrix_bytes(value: f32) -> Vec<u8> {
    bytemuck::cast_slice(&[value; 16]).to_vec()
}

//! Render views: an output size plus the per-pass state sized to it.

use std::sync::Arc;

use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Texture};
use crate::types::Extent2d;
use crate::uniform::UniformWriter;

use super::{FrameBuffer, RenderPassDescriptor};

/// Per-view, per-pass resources a pass keeps between frames.
///
/// Everything here is dropped when the view resizes; passes rebuild lazily
/// through the `*_or_insert_with` accessors.
#[derive(Default)]
pub struct PassResources {
    writers: FxHashMap<String, UniformWriter>,
    buffers: FxHashMap<String, Arc<Buffer>>,
    storage_images: FxHashMap<String, Arc<Texture>>,
}

impl PassResources {
    pub fn writer(&self, name: &str) -> Option<&UniformWriter> {
        self.writers.get(name)
    }

    pub fn writer_mut(&mut self, name: &str) -> Option<&mut UniformWriter> {
        self.writers.get_mut(name)
    }

    pub fn insert_writer(&mut self, name: impl Into<String>, writer: UniformWriter) {
        self.writers.insert(name.into(), writer);
    }

    pub fn writer_or_insert_with(
        &mut self,
        name: &str,
        create: impl FnOnce() -> UniformWriter,
    ) -> &mut UniformWriter {
        self.writers.entry(name.to_string()).or_insert_with(create)
    }

    pub fn buffer(&self, name: &str) -> Option<&Arc<Buffer>> {
        self.buffers.get(name)
    }

    pub fn buffer_or_insert_with(
        &mut self,
        name: &str,
        create: impl FnOnce() -> Result<Buffer, GraphicsError>,
    ) -> Result<&Arc<Buffer>, GraphicsError> {
        if !self.buffers.contains_key(name) {
            let buffer = Arc::new(create()?);
            self.buffers.insert(name.to_string(), buffer);
        }
        self.buffers
            .get(name)
            .ok_or_else(|| GraphicsError::MissingBinding(format!("buffer '{name}'")))
    }

    pub fn storage_image(&self, name: &str) -> Option<&Arc<Texture>> {
        self.storage_images.get(name)
    }

    pub fn storage_image_or_insert_with(
        &mut self,
        name: &str,
        create: impl FnOnce() -> Result<Texture, GraphicsError>,
    ) -> Result<&Arc<Texture>, GraphicsError> {
        if !self.storage_images.contains_key(name) {
            let texture = Arc::new(create()?);
            self.storage_images.insert(name.to_string(), texture);
        }
        self.storage_images
            .get(name)
            .ok_or_else(|| GraphicsError::MissingBinding(format!("storage image '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.writers.len() + self.buffers.len() + self.storage_images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.writers.clear();
        self.buffers.clear();
        self.storage_images.clear();
    }
}

impl std::fmt::Debug for PassResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassResources")
            .field("writers", &self.writers.keys().collect::<Vec<_>>())
            .field("buffers", &self.buffers.keys().collect::<Vec<_>>())
            .field("storage_images", &self.storage_images.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A render target the graph draws into: one framebuffer and one
/// [`PassResources`] per pass, kept in pass order.
#[derive(Debug)]
pub struct RenderView {
    label: String,
    size: Extent2d,
    framebuffers: IndexMap<String, FrameBuffer>,
    resources: IndexMap<String, PassResources>,
    resize_count: u64,
}

impl RenderView {
    pub fn new(label: impl Into<String>, size: Extent2d) -> Self {
        Self {
            label: label.into(),
            size,
            framebuffers: IndexMap::new(),
            resources: IndexMap::new(),
            resize_count: 0,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn size(&self) -> Extent2d {
        self.size
    }

    /// Number of resizes that actually changed the size.
    pub fn resize_count(&self) -> u64 {
        self.resize_count
    }

    /// Change the output size.
    ///
    /// Viewport-relative framebuffers are recreated at the new size and all
    /// per-pass resources are dropped. Old textures and descriptor sets go
    /// through the device's deletion queue. On error the view keeps its old
    /// size, so the resize can be retried.
    pub fn resize(
        &mut self,
        device: &Arc<GraphicsDevice>,
        size: Extent2d,
    ) -> Result<(), GraphicsError> {
        if size == self.size {
            return Ok(());
        }
        log::info!(
            "Resizing view '{}': {}x{} -> {}x{}",
            self.label,
            self.size.width,
            self.size.height,
            size.width,
            size.height
        );
        for framebuffer in self.framebuffers.values_mut() {
            framebuffer.resize_to_view(device, size)?;
        }
        self.size = size;
        self.resize_count += 1;
        for resources in self.resources.values_mut() {
            resources.clear();
        }
        Ok(())
    }

    pub fn framebuffer(&self, pass: &str) -> Option<&FrameBuffer> {
        self.framebuffers.get(pass)
    }

    pub fn resources(&self, pass: &str) -> Option<&PassResources> {
        self.resources.get(pass)
    }

    pub fn resources_mut(&mut self, pass: &str) -> &mut PassResources {
        self.resources.entry(pass.to_string()).or_default()
    }

    /// Make sure `pass` has a framebuffer matching the view and the current
    /// number of frames in flight.
    pub(crate) fn prepare_pass(
        &mut self,
        device: &Arc<GraphicsDevice>,
        pass: &RenderPassDescriptor,
    ) -> Result<(), GraphicsError> {
        if !self.resources.contains_key(&pass.name) {
            self.resources.insert(pass.name.clone(), PassResources::default());
        }
        if pass.attachments.is_empty() {
            return Ok(());
        }

        match self.framebuffers.get_mut(&pass.name) {
            Some(framebuffer) => {
                if framebuffer.sync_slots(device)? {
                    // Writers may reference the replaced attachments.
                    if let Some(resources) = self.resources.get_mut(&pass.name) {
                        resources.clear();
                    }
                }
            }
            None => {
                let framebuffer = FrameBuffer::new(device, pass, self.size)?;
                log::debug!(
                    "Created framebuffer for pass '{}' in view '{}' ({}x{})",
                    pass.name,
                    self.label,
                    framebuffer.extent().width,
                    framebuffer.extent().height
                );
                self.framebuffers.insert(pass.name.clone(), framebuffer);
            }
        }
        Ok(())
    }

    /// The framebuffer and resources of one pass, borrowed together.
    pub(crate) fn pass_targets(
        &mut self,
        pass: &str,
    ) -> (Option<&FrameBuffer>, &mut PassResources) {
        let framebuffer = self.framebuffers.get(pass);
        let resources = self.resources.entry(pass.to_string()).or_default();
        (framebuffer, resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceParameters;
    use crate::graph::{AttachmentDescription, PassSize};
    use crate::types::{BufferUsage, MemoryResidency, TextureFormat};

    fn create_test_device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), DeviceParameters::default()).unwrap();
        (backend, device)
    }

    fn lighting() -> RenderPassDescriptor {
        RenderPassDescriptor::graphics("lighting")
            .with_attachment(AttachmentDescription::color("hdr", TextureFormat::Rgba16Float))
    }

    #[test]
    fn test_prepare_creates_framebuffer_once() {
        let (backend, device) = create_test_device();
        let mut view = RenderView::new("main", Extent2d::new(320, 240));

        view.prepare_pass(&device, &lighting()).unwrap();
        view.prepare_pass(&device, &lighting()).unwrap();
        view.prepare_pass(&device, &RenderPassDescriptor::compute("cull")).unwrap();

        assert_eq!(backend.live_textures(), 2);
        assert_eq!(view.framebuffer("lighting").unwrap().extent(), Extent2d::new(320, 240));
        assert!(view.framebuffer("cull").is_none());
        assert!(view.resources("cull").is_some());
    }

    #[test]
    fn test_resize_drops_pass_resources() {
        let (_backend, device) = create_test_device();
        let mut view = RenderView::new("main", Extent2d::new(320, 240));
        view.prepare_pass(&device, &lighting()).unwrap();

        view.resources_mut("lighting")
            .buffer_or_insert_with("params", || {
                Buffer::create(
                    &device,
                    16,
                    1,
                    BufferUsage::UNIFORM,
                    MemoryResidency::HostVisible,
                    true,
                )
            })
            .unwrap();
        assert_eq!(view.resources("lighting").unwrap().len(), 1);

        view.resize(&device, Extent2d::new(320, 240)).unwrap();
        assert_eq!(view.resize_count(), 0);
        assert_eq!(view.resources("lighting").unwrap().len(), 1);

        view.resize(&device, Extent2d::new(640, 480)).unwrap();
        assert_eq!(view.resize_count(), 1);
        assert!(view.resources("lighting").unwrap().is_empty());
        let framebuffer = view.framebuffer("lighting").unwrap();
        assert_eq!(framebuffer.extent(), Extent2d::new(640, 480));
        assert_eq!(framebuffer.generation(), 1);
    }

    #[test]
    fn test_failed_resize_keeps_old_size() {
        let backend = Arc::new(DummyBackend::new().with_texture_limit(3));
        let device = GraphicsDevice::with_backend(
            backend.clone(),
            DeviceParameters::default().with_frames_in_flight(2),
        )
        .unwrap();
        let mut view = RenderView::new("main", Extent2d::new(320, 240));
        view.prepare_pass(&device, &lighting()).unwrap();
        assert_eq!(backend.live_textures(), 2);

        assert!(view.resize(&device, Extent2d::new(640, 480)).is_err());
        assert_eq!(view.size(), Extent2d::new(320, 240));
        assert_eq!(view.resize_count(), 0);
        let framebuffer = view.framebuffer("lighting").unwrap();
        assert_eq!(framebuffer.extent(), Extent2d::new(320, 240));
        assert_eq!(framebuffer.generation(), 0);
        assert_eq!(framebuffer.attachments(1).len(), 1);
    }

    #[test]
    fn test_fixed_framebuffer_survives_resize() {
        let (_backend, device) = create_test_device();
        let mut view = RenderView::new("main", Extent2d::new(320, 240));
        let shadow = RenderPassDescriptor::graphics("shadow")
            .with_attachment(AttachmentDescription::depth("depth", TextureFormat::Depth32Float))
            .with_size(PassSize::Fixed(Extent2d::new(512, 512)));
        view.prepare_pass(&device, &shadow).unwrap();

        view.resize(&device, Extent2d::new(1024, 768)).unwrap();
        assert_eq!(view.framebuffer("shadow").unwrap().generation(), 0);
    }
}

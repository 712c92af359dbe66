//! GPU texture resource.

use std::sync::Arc;

use crate::backend::{SamplerHandle, TextureHandle};
use crate::deletion::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::types::{Extent2d, SamplerDescriptor, TextureDescriptor, TextureFormat};

/// A GPU texture, optionally paired with a shared sampler.
///
/// Samplers come from the device's sampler cache and outlive the texture.
/// Dropping the texture queues the image for deferred destruction.
///
/// # Example
///
/// ```ignore
/// let albedo = Texture::with_sampler(
///     &device,
///     TextureDescriptor::new_2d(512, 512, TextureFormat::Rgba8UnormSrgb, TextureUsage::TEXTURE_BINDING),
///     &SamplerDescriptor::linear(),
/// )?;
/// writer.write_texture("albedo", &albedo);
/// ```
pub struct Texture {
    device: Arc<GraphicsDevice>,
    descriptor: TextureDescriptor,
    handle: TextureHandle,
    sampler: Option<SamplerHandle>,
}

impl Texture {
    pub fn create(
        device: &Arc<GraphicsDevice>,
        descriptor: TextureDescriptor,
    ) -> Result<Self, GraphicsError> {
        let handle = device.backend().create_texture(&descriptor)?;
        Ok(Self {
            device: Arc::clone(device),
            descriptor,
            handle,
            sampler: None,
        })
    }

    /// Create a texture sampled through the cached sampler for `sampler`.
    pub fn with_sampler(
        device: &Arc<GraphicsDevice>,
        descriptor: TextureDescriptor,
        sampler: &SamplerDescriptor,
    ) -> Result<Self, GraphicsError> {
        let sampler = device.sampler(sampler)?;
        let mut texture = Self::create(device, descriptor)?;
        texture.sampler = Some(sampler);
        Ok(texture)
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn sampler(&self) -> Option<SamplerHandle> {
        self.sampler
    }

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn extent(&self) -> Extent2d {
        self.descriptor.size
    }

    pub fn width(&self) -> u32 {
        self.descriptor.size.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.size.height
    }

    pub fn format(&self) -> TextureFormat {
        self.descriptor.format
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.device
            .defer_destroy(DeferredResource::Texture(self.handle));
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("size", &self.descriptor.size)
            .field("format", &self.descriptor.format)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Texture: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceParameters;
    use crate::types::TextureUsage;

    fn create_test_device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), DeviceParameters::default()).unwrap();
        (backend, device)
    }

    #[test]
    fn test_texture_dimensions() {
        let (backend, device) = create_test_device();
        let desc = TextureDescriptor::new_2d(
            800,
            600,
            TextureFormat::Rgba8Unorm,
            TextureUsage::TEXTURE_BINDING,
        )
        .with_label("albedo");
        let texture = Texture::create(&device, desc).unwrap();
        assert_eq!(texture.width(), 800);
        assert_eq!(texture.height(), 600);
        assert_eq!(texture.label(), Some("albedo"));
        assert!(texture.sampler().is_none());
        assert_eq!(
            backend.texture_descriptor(texture.handle()).unwrap().size,
            Extent2d::new(800, 600)
        );
        assert!(format!("{texture:?}").contains("800"));
    }

    #[test]
    fn test_textures_share_cached_sampler() {
        let (_, device) = create_test_device();
        let desc =
            TextureDescriptor::new_2d(4, 4, TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING);
        let a = Texture::with_sampler(&device, desc.clone(), &SamplerDescriptor::linear()).unwrap();
        let b = Texture::with_sampler(&device, desc, &SamplerDescriptor::linear()).unwrap();
        assert!(a.sampler().is_some());
        assert_eq!(a.sampler(), b.sampler());
    }

    #[test]
    fn test_drop_defers_destruction() {
        let (backend, device) = create_test_device();
        let desc =
            TextureDescriptor::new_2d(4, 4, TextureFormat::R8Unorm, TextureUsage::TEXTURE_BINDING);
        let texture = Texture::create(&device, desc).unwrap();
        let handle = texture.handle();
        drop(texture);

        assert!(backend.is_texture_alive(handle));
        device.shutdown().unwrap();
        assert!(!backend.is_texture_alive(handle));
    }
}

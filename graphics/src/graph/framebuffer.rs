//! Per-pass render targets.

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Texture;
use crate::types::{Extent2d, TextureDescriptor, TextureUsage};

use super::{AttachmentDescription, PassKind, PassSize, RenderPassDescriptor};

/// The attachments one pass renders into, one set per frame slot.
///
/// Viewport-relative framebuffers follow the view through
/// [`resize_to_view`](Self::resize_to_view); fixed-size ones never change.
/// Replaced textures go through deferred destruction, so a frame still in
/// flight keeps rendering into the old set.
pub struct FrameBuffer {
    pass: String,
    kind: PassKind,
    size: PassSize,
    descriptions: Vec<AttachmentDescription>,
    extent: Extent2d,
    attachments: Vec<Vec<Texture>>,
    generation: u64,
}

impl FrameBuffer {
    pub fn new(
        device: &Arc<GraphicsDevice>,
        pass: &RenderPassDescriptor,
        view_size: Extent2d,
    ) -> Result<Self, GraphicsError> {
        let mut framebuffer = Self {
            pass: pass.name.clone(),
            kind: pass.kind,
            size: pass.size,
            descriptions: pass.attachments.clone(),
            extent: pass.size.resolve(view_size),
            attachments: Vec::new(),
            generation: 0,
        };
        framebuffer.attachments = framebuffer.allocate(device)?;
        Ok(framebuffer)
    }

    fn allocate(&self, device: &Arc<GraphicsDevice>) -> Result<Vec<Vec<Texture>>, GraphicsError> {
        let usage = match self.kind {
            PassKind::Graphics => TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            PassKind::Compute => TextureUsage::STORAGE_BINDING | TextureUsage::TEXTURE_BINDING,
        };

        (0..device.frames_in_flight())
            .map(|slot| {
                self.descriptions
                    .iter()
                    .map(|attachment| {
                        let descriptor = TextureDescriptor::new_2d(
                            self.extent.width,
                            self.extent.height,
                            attachment.format,
                            usage,
                        )
                        .with_label(format!("{}/{}[{slot}]", self.pass, attachment.name));
                        Texture::create(device, descriptor)
                    })
                    .collect()
            })
            .collect()
    }

    /// Recreate the attachments if the pass follows the view and its
    /// resolved size changed. Returns whether anything was recreated.
    pub fn resize_to_view(
        &mut self,
        device: &Arc<GraphicsDevice>,
        view_size: Extent2d,
    ) -> Result<bool, GraphicsError> {
        if !self.size.resizes_with_viewport() {
            return Ok(false);
        }
        let extent = self.size.resolve(view_size);
        if extent == self.extent {
            return Ok(false);
        }

        log::debug!(
            "Resizing framebuffer '{}': {}x{} -> {}x{}",
            self.pass,
            self.extent.width,
            self.extent.height,
            extent.width,
            extent.height
        );
        let previous = std::mem::replace(&mut self.extent, extent);
        if let Err(e) = self.rebuild(device) {
            self.extent = previous;
            return Err(e);
        }
        Ok(true)
    }

    /// Reallocate when the number of frames in flight changed.
    pub(crate) fn sync_slots(&mut self, device: &Arc<GraphicsDevice>) -> Result<bool, GraphicsError> {
        if self.attachments.len() == device.frames_in_flight() {
            return Ok(false);
        }
        self.rebuild(device)?;
        Ok(true)
    }

    fn rebuild(&mut self, device: &Arc<GraphicsDevice>) -> Result<(), GraphicsError> {
        self.attachments = self.allocate(device)?;
        self.generation += 1;
        Ok(())
    }

    pub fn pass(&self) -> &str {
        &self.pass
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn size(&self) -> PassSize {
        self.size
    }

    /// Attachments for `slot`, in the pass's attachment order.
    pub fn attachments(&self, slot: usize) -> &[Texture] {
        match self.attachments.len() {
            0 => &[],
            len => &self.attachments[slot % len],
        }
    }

    pub fn attachment(&self, slot: usize, name: &str) -> Option<&Texture> {
        let index = self.descriptions.iter().position(|a| a.name == name)?;
        self.attachments(slot).get(index)
    }

    pub fn slot_count(&self) -> usize {
        self.attachments.len()
    }

    /// Bumped on every reallocation.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("pass", &self.pass)
            .field("extent", &self.extent)
            .field("slots", &self.attachments.len())
            .field("generation", &self.generation)
            .finish()
    }
}

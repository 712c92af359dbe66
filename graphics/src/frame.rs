//! The per-frame recording handle.
//!
//! A [`Frame`] is returned by [`GraphicsDevice::begin_frame`] and consumed by
//! [`GraphicsDevice::end_frame`]. Every command of the frame is recorded
//! through it, into the frame-in-flight slot it was started on.
//!
//! # Frame Overlap
//!
//! With 2 frames in flight the host records frame K+1 while the GPU executes
//! frame K:
//!
//! ```text
//! Frame 0: [record S0] [submit] ───────────────────────────────────────►
//!                               [GPU executes frame 0] ────────────────►
//!
//! Frame 1:             [record S1] [submit] ───────────────────────────►
//!                                           [GPU executes frame 1] ────►
//!
//! Frame 2:                         [wait S0] [record S0] [submit] ─────►
//! ```
//!
//! Slot-indexed resources (descriptor sets of a writer, copies of a
//! multi-buffered buffer) are only ever written for the frame's own slot, and
//! `begin_frame` has already waited for the GPU to release that slot.
//!
//! # Pass Brackets
//!
//! Draws and dispatches must sit between [`Frame::begin_render_pass`] and
//! [`Frame::end_render_pass`]. Nesting passes, drawing outside a pass and
//! ending the frame with a pass still open are reported through
//! [`fatal`](crate::error::fatal).

use std::sync::Arc;

use crate::backend::{AttachmentBinding, Command, PipelineHandle};
use crate::device::GraphicsDevice;
use crate::error::{fatal, GraphicsError, OrFatal};
use crate::graph::{FrameBuffer, PassKind, RenderPassDescriptor};
use crate::pipeline::Pipeline;
use crate::resources::{Buffer, Mesh};
use crate::types::{Extent2d, ScissorRect, Viewport};
use crate::uniform::UniformWriter;

/// Counters of the work recorded into one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: u32,
    pub draws: u32,
    pub dispatches: u32,
    pub commands: u32,
}

#[derive(Debug)]
struct OpenPass {
    name: String,
    kind: PassKind,
}

/// Handle to the frame being recorded.
pub struct Frame {
    device: Arc<GraphicsDevice>,
    index: u64,
    slot: usize,
    open_pass: Option<OpenPass>,
    bound_pipeline: Option<PipelineHandle>,
    submitted: bool,
    stats: FrameStats,
}

impl Frame {
    pub(crate) fn new(device: Arc<GraphicsDevice>, index: u64, slot: usize) -> Self {
        Self {
            device,
            index,
            slot,
            open_pass: None,
            bound_pipeline: None,
            submitted: false,
            stats: FrameStats::default(),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Global frame index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Frame-in-flight slot, `index % frames_in_flight`.
    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Name of the pass currently open, if any.
    pub fn current_pass(&self) -> Option<&str> {
        self.open_pass.as_ref().map(|p| p.name.as_str())
    }

    /// Open `pass`, transitioning and clearing its attachments.
    ///
    /// Graphics passes render into the current slot's attachments of
    /// `framebuffer` and get a viewport and scissor covering it.
    pub fn begin_render_pass(
        &mut self,
        pass: &RenderPassDescriptor,
        framebuffer: Option<&FrameBuffer>,
    ) {
        if let Some(open) = &self.open_pass {
            fatal(
                &format!("beginning render pass '{}'", pass.name),
                GraphicsError::InvalidParameter(format!("pass '{}' is still open", open.name)),
            );
        }

        let (attachments, extent) = match framebuffer {
            Some(framebuffer) => {
                let attachments = pass
                    .attachments
                    .iter()
                    .zip(framebuffer.attachments(self.slot))
                    .map(|(description, texture)| AttachmentBinding {
                        texture: texture.handle(),
                        load_op: description.load_op,
                        store_op: description.store_op,
                        final_layout: description.final_layout,
                    })
                    .collect();
                (attachments, framebuffer.extent())
            }
            None if pass.kind == PassKind::Graphics && !pass.attachments.is_empty() => fatal(
                &format!("beginning render pass '{}'", pass.name),
                GraphicsError::MissingBinding("graphics pass has no framebuffer".to_string()),
            ),
            None => (Vec::new(), Extent2d::default()),
        };

        self.record(Command::BeginPass {
            name: pass.name.clone(),
            kind: pass.kind,
            attachments,
            extent,
        });
        if pass.kind == PassKind::Graphics {
            self.record(Command::SetViewport(Viewport::from_extent(extent)));
            self.record(Command::SetScissor(ScissorRect::from_extent(extent)));
        }

        self.open_pass = Some(OpenPass {
            name: pass.name.clone(),
            kind: pass.kind,
        });
        self.bound_pipeline = None;
        self.stats.passes += 1;
    }

    /// Close the open pass.
    pub fn end_render_pass(&mut self) {
        if self.open_pass.take().is_none() {
            fatal(
                "ending render pass",
                GraphicsError::InvalidParameter("no render pass is open".to_string()),
            );
        }
        self.bound_pipeline = None;
        self.record(Command::EndPass);
    }

    /// Draw `mesh` with `pipeline`.
    ///
    /// Every descriptor set of the pipeline must be covered by one of
    /// `writers`; vertex slots the pipeline marks per-instance read from
    /// `instance_buffer`.
    pub fn render(
        &mut self,
        mesh: &Mesh,
        pipeline: &Pipeline,
        instance_buffer: Option<&Buffer>,
        instance_count: u32,
        writers: &[&UniformWriter],
    ) {
        let context = format!("drawing '{}' with pipeline '{}'", mesh.label(), pipeline.label());
        self.expect_pass(PassKind::Graphics, &context);
        self.bind_pipeline_and_sets(pipeline, writers, &context);

        for layout in pipeline.vertex_buffers() {
            let buffer = if layout.per_instance {
                instance_buffer
            } else {
                mesh.vertex_buffer(layout.binding).map(Arc::as_ref)
            };
            let Some(buffer) = buffer else {
                fatal(
                    &context,
                    GraphicsError::MissingBinding(format!(
                        "no {} buffer for vertex slot {}",
                        if layout.per_instance { "instance" } else { "vertex" },
                        layout.binding
                    )),
                );
            };
            self.record(Command::BindVertexBuffer {
                slot: layout.binding,
                buffer: buffer.handle(),
                offset: 0,
            });
        }

        match mesh.index_buffer() {
            Some(indices) => {
                self.record(Command::BindIndexBuffer {
                    buffer: indices.handle(),
                    offset: 0,
                });
                self.record(Command::DrawIndexed {
                    index_count: mesh.index_count(),
                    instance_count,
                });
            }
            None => self.record(Command::Draw {
                vertex_count: mesh.vertex_count(),
                instance_count,
            }),
        }
        self.stats.draws += 1;
    }

    /// Dispatch `pipeline` over `groups` workgroups.
    pub fn dispatch(&mut self, pipeline: &Pipeline, writers: &[&UniformWriter], groups: [u32; 3]) {
        let context = format!("dispatching pipeline '{}'", pipeline.label());
        self.expect_pass(PassKind::Compute, &context);
        self.bind_pipeline_and_sets(pipeline, writers, &context);

        let [x, y, z] = groups;
        self.record(Command::Dispatch { x, y, z });
        self.stats.dispatches += 1;
    }

    pub(crate) fn record(&mut self, command: Command) {
        self.device
            .backend()
            .record(self.slot, command)
            .or_fatal("recording frame");
        self.stats.commands += 1;
    }

    pub(crate) fn submit(mut self) -> Result<(), GraphicsError> {
        if let Some(open) = &self.open_pass {
            fatal(
                &format!("ending frame {}", self.index),
                GraphicsError::InvalidParameter(format!("render pass '{}' is still open", open.name)),
            );
        }
        self.submitted = true;
        log::trace!(
            "Submitting frame {} (slot {}): {:?}",
            self.index,
            self.slot,
            self.stats
        );
        self.device.submit_slot(self.slot)
    }

    fn expect_pass(&self, kind: PassKind, context: &str) {
        match &self.open_pass {
            Some(open) if open.kind == kind => {}
            Some(open) => fatal(
                context,
                GraphicsError::InvalidParameter(format!(
                    "pass '{}' is a {:?} pass",
                    open.name, open.kind
                )),
            ),
            None => fatal(
                context,
                GraphicsError::InvalidParameter("no render pass is open".to_string()),
            ),
        }
    }

    fn bind_pipeline_and_sets(
        &mut self,
        pipeline: &Pipeline,
        writers: &[&UniformWriter],
        context: &str,
    ) {
        if let Some(open) = self.open_pass.as_ref().filter(|p| p.kind != pipeline.kind()) {
            fatal(
                context,
                GraphicsError::InvalidParameter(format!(
                    "{:?} pipeline inside {:?} pass '{}'",
                    pipeline.kind(),
                    open.kind,
                    open.name
                )),
            );
        }
        if self.bound_pipeline != Some(pipeline.handle()) {
            pipeline.bind(self);
            self.bound_pipeline = Some(pipeline.handle());
        }

        for (set, layout) in pipeline.layouts() {
            let Some(writer) = writers.iter().find(|w| w.layout().set() == *set) else {
                fatal(
                    context,
                    GraphicsError::MissingBinding(format!("no uniform writer for set {set}")),
                );
            };
            if !Arc::ptr_eq(writer.layout(), layout)
                && writer.layout().bindings() != layout.bindings()
            {
                fatal(
                    context,
                    GraphicsError::InvalidParameter(format!(
                        "writer '{}' does not match the layout of set {set}",
                        writer.label()
                    )),
                );
            }
            writer.bind(self);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if self.submitted {
            return;
        }
        if !std::thread::panicking() {
            log::error!("Frame {} dropped without end_frame, submitting", self.index);
        }
        if let Err(e) = self.device.submit_slot(self.slot) {
            log::error!("Failed to submit abandoned frame {}: {e}", self.index);
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("slot", &self.slot)
            .field("pass", &self.current_pass())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::device::DeviceParameters;
    use crate::graph::{AttachmentDescription, PassSize};
    use crate::types::{ClearValue, LoadOp, TextureFormat};

    fn create_test_device() -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device =
            GraphicsDevice::with_backend(backend.clone(), DeviceParameters::default()).unwrap();
        (backend, device)
    }

    fn color_pass() -> RenderPassDescriptor {
        RenderPassDescriptor::graphics("main")
            .with_attachment(
                AttachmentDescription::color("color", TextureFormat::Rgba8Unorm)
                    .with_load_op(LoadOp::Clear(ClearValue::BLACK)),
            )
            .with_size(PassSize::Fixed(Extent2d::new(64, 32)))
    }

    #[test]
    fn test_pass_records_attachments_viewport_and_scissor() {
        let (backend, device) = create_test_device();
        let pass = color_pass();
        let framebuffer = FrameBuffer::new(&device, &pass, Extent2d::new(64, 32)).unwrap();

        let mut frame = device.begin_frame().unwrap();
        frame.begin_render_pass(&pass, Some(&framebuffer));
        assert_eq!(frame.current_pass(), Some("main"));
        frame.end_render_pass();
        device.end_frame(frame).unwrap();

        let commands = backend.last_frame();
        assert_eq!(commands.len(), 4);
        assert_eq!(commands[0].clear_values(), vec![ClearValue::BLACK]);
        match &commands[0] {
            Command::BeginPass {
                attachments, extent, ..
            } => {
                assert_eq!(*extent, Extent2d::new(64, 32));
                assert_eq!(attachments[0].texture, framebuffer.attachments(0)[0].handle());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(
            commands[1],
            Command::SetViewport(Viewport::from_extent(Extent2d::new(64, 32)))
        );
        assert_eq!(commands[3], Command::EndPass);
    }

    #[test]
    fn test_each_slot_uses_its_own_attachments() {
        let (backend, device) = create_test_device();
        let pass = color_pass();
        let framebuffer = FrameBuffer::new(&device, &pass, Extent2d::new(8, 8)).unwrap();

        let mut targets = Vec::new();
        for _ in 0..2 {
            let mut frame = device.begin_frame().unwrap();
            frame.begin_render_pass(&pass, Some(&framebuffer));
            frame.end_render_pass();
            device.end_frame(frame).unwrap();
            if let Command::BeginPass { attachments, .. } = &backend.last_frame()[0] {
                targets.push(attachments[0].texture);
            }
        }
        assert_eq!(targets.len(), 2);
        assert_ne!(targets[0], targets[1]);
    }

    #[test]
    #[should_panic(expected = "pass 'main' is still open")]
    fn test_nested_pass_is_fatal() {
        let (_, device) = create_test_device();
        let pass = color_pass();
        let framebuffer = FrameBuffer::new(&device, &pass, Extent2d::new(8, 8)).unwrap();
        let mut frame = device.begin_frame().unwrap();
        frame.begin_render_pass(&pass, Some(&framebuffer));
        frame.begin_render_pass(&pass, Some(&framebuffer));
    }

    #[test]
    #[should_panic(expected = "no render pass is open")]
    fn test_unmatched_end_is_fatal() {
        let (_, device) = create_test_device();
        let mut frame = device.begin_frame().unwrap();
        frame.end_render_pass();
    }

    #[test]
    #[should_panic(expected = "render pass 'main' is still open")]
    fn test_end_frame_with_open_pass_is_fatal() {
        let (_, device) = create_test_device();
        let pass = color_pass();
        let framebuffer = FrameBuffer::new(&device, &pass, Extent2d::new(8, 8)).unwrap();
        let mut frame = device.begin_frame().unwrap();
        frame.begin_render_pass(&pass, Some(&framebuffer));
        let _ = device.end_frame(frame);
    }

    #[test]
    fn test_dropped_frame_is_still_submitted() {
        let (backend, device) = create_test_device();
        let frame = device.begin_frame().unwrap();
        drop(frame);
        assert_eq!(device.frame_index(), 1);
        assert_eq!(backend.stats().frames_submitted, 1);
        assert!(device.begin_frame().is_ok());
    }

    #[test]
    fn test_compute_pass_without_framebuffer() {
        let (backend, device) = create_test_device();
        let pass = RenderPassDescriptor::compute("simulate");
        let mut frame = device.begin_frame().unwrap();
        frame.begin_render_pass(&pass, None);
        frame.end_render_pass();
        assert_eq!(frame.stats().passes, 1);
        device.end_frame(frame).unwrap();
        assert_eq!(backend.last_frame().len(), 2);
    }
}

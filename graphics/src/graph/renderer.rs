//! Frame driver: runs every pass of a graph against a view.

use std::sync::Arc;

use glam::{Mat4, Vec3};

use crate::device::GraphicsDevice;
use crate::error::{fatal, GraphicsError, OrFatal};
use crate::frame::{Frame, FrameStats};
use crate::pipeline::{Pipeline, PipelineCache};
use crate::types::Extent2d;
use crate::uniform::UniformLayout;
use crate::{profile_function, profile_scope};

use super::{FrameBuffer, PassResources, RenderGraph, RenderPassDescriptor, RenderView};

/// A right-handed perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub view: Mat4,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            view: Mat4::IDENTITY,
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        Self {
            view: Mat4::look_at_rh(eye, target, up),
            ..Default::default()
        }
    }

    pub fn with_fov_y(mut self, fov_y: f32) -> Self {
        self.fov_y = fov_y;
        self
    }

    pub fn with_clip(mut self, near: f32, far: f32) -> Self {
        self.near = near;
        self.far = far;
        self
    }

    pub fn projection(&self, aspect_ratio: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, aspect_ratio, self.near, self.far)
    }

    pub fn view_projection(&self, aspect_ratio: f32) -> Mat4 {
        self.projection(aspect_ratio) * self.view
    }
}

/// Everything a pass sees while recording.
pub struct PassContext<'a, S> {
    pub device: &'a Arc<GraphicsDevice>,
    pub pipelines: &'a PipelineCache,
    pub frame: &'a mut Frame,
    pub pass: &'a RenderPassDescriptor,
    /// Pipeline created from the pass descriptor, if any.
    pub pipeline: Option<&'a Arc<Pipeline>>,
    pub uniform_layout: Option<&'a Arc<UniformLayout>>,
    pub framebuffer: Option<&'a FrameBuffer>,
    pub resources: &'a mut PassResources,
    pub camera: &'a Camera,
    /// Projection for `output_size`.
    pub projection: Mat4,
    pub output_size: Extent2d,
    pub scene: &'a S,
}

impl<S> PassContext<'_, S> {
    /// Open this pass on its framebuffer.
    pub fn begin_render_pass(&mut self) {
        self.frame.begin_render_pass(self.pass, self.framebuffer);
    }

    pub fn end_render_pass(&mut self) {
        self.frame.end_render_pass();
    }

    pub fn slot(&self) -> usize {
        self.frame.slot()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.camera.view
    }
}

/// Drives frames for one device.
///
/// Each [`render`](Self::render) call begins a frame, runs every pass of the
/// graph in declaration order, then ends the frame. Failures are fatal.
pub struct Renderer {
    device: Arc<GraphicsDevice>,
    frames_rendered: u64,
    last_stats: FrameStats,
}

impl Renderer {
    pub fn new(device: Arc<GraphicsDevice>) -> Self {
        Self {
            device,
            frames_rendered: 0,
            last_stats: FrameStats::default(),
        }
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Render one frame of `graph` into `view`.
    pub fn render<S>(
        &mut self,
        graph: &mut RenderGraph<S>,
        view: &mut RenderView,
        camera: &Camera,
        scene: &S,
    ) -> FrameStats {
        profile_function!();

        if !Arc::ptr_eq(graph.device(), &self.device) {
            fatal(
                "rendering graph",
                GraphicsError::InvalidParameter(
                    "graph was created on a different device".to_string(),
                ),
            );
        }
        graph.initialize().or_fatal("initializing render graph");

        let device = Arc::clone(&self.device);
        let mut frame = device.begin_frame().or_fatal("beginning frame");
        let (pipelines, passes) = graph.split_mut();

        for pass in passes.iter_mut() {
            profile_scope!("render_pass");
            let (descriptor, pipeline, uniform_layout, node) = pass.parts_mut();

            view.prepare_pass(&device, descriptor)
                .or_fatal(&format!("preparing pass '{}'", descriptor.name));
            let view_size = view.size();
            let (framebuffer, resources) = view.pass_targets(&descriptor.name);
            let output_size = framebuffer.map_or(view_size, FrameBuffer::extent);

            let mut ctx = PassContext {
                device: &device,
                pipelines,
                frame: &mut frame,
                pass: descriptor,
                pipeline,
                uniform_layout,
                framebuffer,
                resources,
                camera,
                projection: camera.projection(output_size.aspect_ratio()),
                output_size,
                scene,
            };
            node.render(&mut ctx);
        }

        let stats = frame.stats();
        device.end_frame(frame).or_fatal("ending frame");

        self.frames_rendered += 1;
        self.last_stats = stats;
        log::trace!(
            "Frame {} done: {} passes, {} draws, {} dispatches",
            self.frames_rendered,
            stats.passes,
            stats.draws,
            stats.dispatches
        );
        stats
    }
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("device", &self.device.label())
            .field("frames_rendered", &self.frames_rendered)
            .finish()
    }
}

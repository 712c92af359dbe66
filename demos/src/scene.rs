//! The demo scene and the pass nodes that draw it.

use std::sync::Arc;

use glam::Vec3;
use inflight_graphics::shader::{ShaderSource, ShaderStage};
use inflight_graphics::{
    Buffer, BufferCreateInfo, BufferUsage, Camera, GraphConfig, GraphicsDevice, GraphicsError,
    Mesh, PassContext, PassKind, PassNode, PipelineDescriptor, RenderGraph, RenderPassDescriptor,
    SamplerDescriptor, Texture, TextureDescriptor, TextureFormat, TextureUsage,
};

/// Pass layout used when no config file is given.
pub const DEFAULT_GRAPH: &str = r#"
[device]
frames_in_flight = 2
label = "demo"

[[passes]]
name = "simulate"
kind = "compute"

[[passes]]
name = "shadow"
size = { mode = "fixed", width = 1024, height = 1024 }

[[passes.attachments]]
name = "depth"
format = "depth32_float"
load_op = { clear = { depth_stencil = { depth = 1.0, stencil = 0 } } }
final_layout = "depth_stencil_attachment"

[[passes]]
name = "main"

[[passes.attachments]]
name = "color"
format = "rgba8_unorm"
load_op = { clear = { color = [0.1, 0.1, 0.12, 1.0] } }
"#;

const PARTICLES_WGSL: &str = r#"
    struct Params {
        time: f32,
        count: u32,
    };
    @group(0) @binding(0) var<uniform> params: Params;
    @group(0) @binding(1) var<storage, read_write> heights: array<f32>;

    @compute @workgroup_size(64)
    fn main(@builtin(global_invocation_id) id: vec3<u32>) {
        if (id.x >= params.count) {
            return;
        }
        heights[id.x] = sin(params.time + f32(id.x) * 0.1);
    }
"#;

const MESH_WGSL: &str = r#"
    struct Globals {
        view_proj: mat4x4<f32>,
        tint: vec4<f32>,
    };
    @group(0) @binding(0) var<uniform> globals: Globals;
    @group(1) @binding(0) var albedo: texture_2d<f32>;
    @group(1) @binding(1) var albedo_sampler: sampler;

    struct VertexOutput {
        @builtin(position) clip: vec4<f32>,
        @location(0) uv: vec2<f32>,
    };

    @vertex
    fn vs_main(@location(0) position: vec3<f32>, @location(1) uv: vec2<f32>) -> VertexOutput {
        var out: VertexOutput;
        out.clip = globals.view_proj * vec4<f32>(position, 1.0);
        out.uv = uv;
        return out;
    }

    @fragment
    fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
        return textureSample(albedo, albedo_sampler, in.uv) * globals.tint;
    }
"#;

const PARTICLE_COUNT: u32 = 256;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 3],
    uv: [f32; 2],
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct SimulationParams {
    time: f32,
    count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    view_proj: [f32; 16],
    tint: [f32; 4],
}

/// Everything the passes draw.
pub struct DemoScene {
    pub mesh: Mesh,
    pub albedo: Arc<Texture>,
    pub camera: Camera,
    pub time: f32,
}

impl DemoScene {
    pub fn new(device: &Arc<GraphicsDevice>) -> Result<Self, GraphicsError> {
        let vertices = [
            Vertex {
                position: [-0.5, -0.5, 0.0],
                uv: [0.0, 1.0],
            },
            Vertex {
                position: [0.5, -0.5, 0.0],
                uv: [1.0, 1.0],
            },
            Vertex {
                position: [0.0, 0.5, 0.0],
                uv: [0.5, 0.0],
            },
        ];
        let vertex_buffer = Buffer::with_info(
            device,
            BufferCreateInfo::new(std::mem::size_of::<Vertex>() as u64, 3, BufferUsage::VERTEX)
                .with_label("triangle"),
        )?;
        vertex_buffer.write_slice(&vertices, 0);

        let albedo = Texture::with_sampler(
            device,
            TextureDescriptor::new_2d(
                64,
                64,
                TextureFormat::Rgba8UnormSrgb,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_label("albedo"),
            &SamplerDescriptor::linear(),
        )?;

        Ok(Self {
            mesh: Mesh::new("triangle", 3).with_vertex_buffer(0, Arc::new(vertex_buffer)),
            albedo: Arc::new(albedo),
            camera: Camera::look_at(Vec3::new(0.0, 0.0, 2.0), Vec3::ZERO, Vec3::Y),
            time: 0.0,
        })
    }

    pub fn advance(&mut self, dt: f32) {
        self.time += dt;
    }

    fn tint(&self) -> [f32; 4] {
        let pulse = 0.75 + 0.25 * self.time.sin();
        [pulse, pulse, 1.0, 1.0]
    }
}

/// Runs the particle height simulation.
#[derive(Default)]
struct SimulatePass;

impl PassNode<DemoScene> for SimulatePass {
    fn render(&mut self, ctx: &mut PassContext<'_, DemoScene>) {
        let Some(pipeline) = ctx.pipeline.cloned() else {
            return;
        };
        let device = Arc::clone(ctx.device);

        let params = ctx
            .resources
            .buffer_or_insert_with("params", || {
                Buffer::with_info(
                    &device,
                    BufferCreateInfo::new(
                        std::mem::size_of::<SimulationParams>() as u64,
                        1,
                        BufferUsage::UNIFORM,
                    )
                    .with_label("simulation params")
                    .multi_buffered(),
                )
            })
            .map(Arc::clone);
        let heights = ctx
            .resources
            .buffer_or_insert_with("heights", || {
                Buffer::with_info(
                    &device,
                    BufferCreateInfo::new(4, PARTICLE_COUNT as u64, BufferUsage::STORAGE)
                        .with_label("heights"),
                )
            })
            .map(Arc::clone);
        let (params, heights) = match (params, heights) {
            (Ok(params), Ok(heights)) => (params, heights),
            (Err(e), _) | (_, Err(e)) => {
                log::error!("simulate: failed to allocate buffers: {e}");
                return;
            }
        };

        params.write_pod(
            &SimulationParams {
                time: ctx.scene.time,
                count: PARTICLE_COUNT,
            },
            0,
        );
        params.flush();

        if ctx.resources.writer("simulation").is_none() {
            if let Some(mut writer) = pipeline.create_writer(0) {
                writer
                    .write_buffer(0u32, &params, params.size(), 0)
                    .write_buffer(1u32, &heights, heights.size(), 0);
                ctx.resources.insert_writer("simulation", writer);
            }
        }
        if let Some(writer) = ctx.resources.writer_mut("simulation") {
            writer.flush();
        }

        ctx.begin_render_pass();
        if let Some(writer) = ctx.resources.writer("simulation") {
            ctx.frame.dispatch(&pipeline, &[writer], [PARTICLE_COUNT.div_ceil(64), 1, 1]);
        }
        ctx.end_render_pass();
    }
}

/// Draws the textured triangle.
#[derive(Default)]
struct MeshPass;

impl PassNode<DemoScene> for MeshPass {
    fn render(&mut self, ctx: &mut PassContext<'_, DemoScene>) {
        let Some(pipeline) = ctx.pipeline.cloned() else {
            ctx.begin_render_pass();
            ctx.end_render_pass();
            return;
        };
        let device = Arc::clone(ctx.device);

        let globals = match ctx.resources.buffer_or_insert_with("globals", || {
            Buffer::with_info(
                &device,
                BufferCreateInfo::new(std::mem::size_of::<Globals>() as u64, 1, BufferUsage::UNIFORM)
                    .with_label("globals")
                    .multi_buffered(),
            )
        }) {
            Ok(globals) => Arc::clone(globals),
            Err(e) => {
                log::error!("{}: failed to allocate globals: {e}", ctx.pass.name);
                return;
            }
        };
        globals.write_pod(
            &Globals {
                view_proj: ctx.view_projection().to_cols_array(),
                tint: ctx.scene.tint(),
            },
            0,
        );
        globals.flush();

        if ctx.resources.writer("globals").is_none() {
            if let (Some(mut set0), Some(mut set1)) =
                (pipeline.create_writer(0), pipeline.create_writer(1))
            {
                set0.write_buffer(0u32, &globals, globals.size(), 0);
                set1.write_texture(0u32, &ctx.scene.albedo)
                    .write_texture(1u32, &ctx.scene.albedo);
                ctx.resources.insert_writer("globals", set0);
                ctx.resources.insert_writer("material", set1);
            }
        }
        for name in ["globals", "material"] {
            if let Some(writer) = ctx.resources.writer_mut(name) {
                writer.flush();
            }
        }

        ctx.begin_render_pass();
        if let (Some(set0), Some(set1)) = (
            ctx.resources.writer("globals"),
            ctx.resources.writer("material"),
        ) {
            ctx.frame.render(&ctx.scene.mesh, &pipeline, None, 1, &[set0, set1]);
        }
        ctx.end_render_pass();
    }
}

/// Clears its attachments and nothing else.
#[derive(Default)]
struct ClearPass;

impl PassNode<DemoScene> for ClearPass {
    fn render(&mut self, ctx: &mut PassContext<'_, DemoScene>) {
        ctx.begin_render_pass();
        ctx.end_render_pass();
    }
}

fn particles_pipeline() -> PipelineDescriptor {
    PipelineDescriptor::compute(
        "particles",
        ShaderSource::wgsl(ShaderStage::Compute, "particles.wgsl", PARTICLES_WGSL),
    )
}

fn mesh_pipeline(pass: &RenderPassDescriptor) -> PipelineDescriptor {
    let (depth, color): (Vec<_>, Vec<_>) = pass
        .attachments
        .iter()
        .map(|attachment| attachment.format)
        .partition(|format| format.is_depth_stencil());

    let mut descriptor = PipelineDescriptor::graphics(
        "mesh",
        ShaderSource::wgsl(ShaderStage::Vertex, "mesh.wgsl", MESH_WGSL).with_entry_point("vs_main"),
        ShaderSource::wgsl(ShaderStage::Fragment, "mesh.wgsl", MESH_WGSL)
            .with_entry_point("fs_main"),
    )
    .with_color_formats(color);
    if let Some(format) = depth.first() {
        descriptor = descriptor.with_depth_format(*format);
    }
    descriptor
}

/// Build the demo graph from `config`.
///
/// Compute passes without a pipeline run the particle simulation; the pass
/// named `main` draws the scene mesh. Every other pass only clears.
pub fn build_graph(
    device: &Arc<GraphicsDevice>,
    config: &GraphConfig,
) -> Result<RenderGraph<DemoScene>, GraphicsError> {
    let mut graph = RenderGraph::new(device);
    for descriptor in &config.passes {
        let mut descriptor = descriptor.clone();
        let node: Box<dyn PassNode<DemoScene>> = match descriptor.kind {
            PassKind::Compute => {
                if descriptor.pipeline.is_none() {
                    descriptor = descriptor.with_pipeline(particles_pipeline());
                }
                Box::new(SimulatePass)
            }
            PassKind::Graphics if descriptor.name == "main" => {
                if descriptor.pipeline.is_none() {
                    let pipeline = mesh_pipeline(&descriptor);
                    descriptor = descriptor.with_pipeline(pipeline);
                }
                Box::new(MeshPass)
            }
            PassKind::Graphics => Box::new(ClearPass),
        };
        graph.add_boxed_pass(descriptor, node)?;
    }
    Ok(graph)
}

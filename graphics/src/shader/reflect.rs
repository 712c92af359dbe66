//! SPIR-V reflection.
//!
//! [`ShaderReflector`] recovers the descriptor bindings and vertex inputs a
//! compiled shader declares. Struct-typed buffers are flattened into a list of
//! members addressed by dotted paths (`light.color`, `lights[2].position`) with
//! absolute byte offsets, so callers can write individual fields without
//! knowing the shader's struct declarations.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use spirq::ty::{DescriptorType, ScalarType, Type};
use spirq::var::Variable;

use crate::error::GraphicsError;
use crate::profile_function;
use crate::types::VertexFormat;

use super::{ShaderStage, ShaderStageFlags};

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Kind of resource a descriptor binding exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    UniformBuffer,
    StorageBuffer,
    CombinedImageSampler,
    SampledImage,
    Sampler,
    StorageImage,
    UniformTexelBuffer,
    StorageTexelBuffer,
    InputAttachment,
    AccelerationStructure,
}

impl ResourceKind {
    /// Bindings written with a buffer range.
    pub fn is_buffer(self) -> bool {
        matches!(self, Self::UniformBuffer | Self::StorageBuffer)
    }

    /// Bindings written with one or more textures.
    pub fn is_image(self) -> bool {
        matches!(
            self,
            Self::CombinedImageSampler
                | Self::SampledImage
                | Self::StorageImage
                | Self::Sampler
                | Self::InputAttachment
        )
    }

    fn from_spirq(desc_ty: &DescriptorType) -> Result<Self, GraphicsError> {
        #[allow(unreachable_patterns)]
        let kind = match desc_ty {
            DescriptorType::UniformBuffer() => Self::UniformBuffer,
            DescriptorType::StorageBuffer(..) => Self::StorageBuffer,
            DescriptorType::CombinedImageSampler() => Self::CombinedImageSampler,
            DescriptorType::SampledImage() => Self::SampledImage,
            DescriptorType::Sampler() => Self::Sampler,
            DescriptorType::StorageImage(..) => Self::StorageImage,
            DescriptorType::UniformTexelBuffer() => Self::UniformTexelBuffer,
            DescriptorType::StorageTexelBuffer(..) => Self::StorageTexelBuffer,
            DescriptorType::InputAttachment(..) => Self::InputAttachment,
            DescriptorType::AccelStruct() => Self::AccelerationStructure,
            other => {
                return Err(GraphicsError::ShaderReflectionFailed(format!(
                    "unsupported descriptor type {other:?}"
                )))
            }
        };
        Ok(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UniformBuffer => "uniform buffer",
            Self::StorageBuffer => "storage buffer",
            Self::CombinedImageSampler => "combined image-sampler",
            Self::SampledImage => "sampled image",
            Self::Sampler => "sampler",
            Self::StorageImage => "storage image",
            Self::UniformTexelBuffer => "uniform texel buffer",
            Self::StorageTexelBuffer => "storage texel buffer",
            Self::InputAttachment => "input attachment",
            Self::AccelerationStructure => "acceleration structure",
        };
        f.write_str(name)
    }
}

/// One leaf member of a flattened buffer struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedMember {
    /// Dotted path from the buffer root.
    pub name: String,
    /// Absolute byte offset inside the buffer.
    pub offset: u32,
    /// Size in bytes. Runtime-sized arrays report one element stride.
    pub size: u32,
}

/// A descriptor binding declared by one or more shader stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectedBinding {
    pub name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    /// Array element count, 1 for non-arrays.
    pub count: u32,
    /// Stages that declare this binding.
    pub stages: ShaderStageFlags,
    /// Byte size for buffer bindings, 0 otherwise.
    pub size: u64,
    /// Flattened struct members for buffer bindings.
    pub members: Vec<ReflectedMember>,
}

impl ReflectedBinding {
    /// Look up a flattened member by its dotted path.
    pub fn member(&self, path: &str) -> Option<&ReflectedMember> {
        self.members.iter().find(|m| m.name == path)
    }

    pub(crate) fn describe(&self) -> String {
        format!("'{}' ({})", self.name, self.kind)
    }
}

/// A vertex shader input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexAttribute {
    pub name: String,
    pub location: u32,
    /// Format of one location. Matrices use their column format.
    pub format: VertexFormat,
    /// Consecutive locations occupied: the column count for matrices, else 1.
    pub rows: u32,
}

/// Everything reflected from one shader stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderReflection {
    pub stage: ShaderStage,
    pub entry_point: String,
    /// Bindings grouped by set, both levels ordered by index.
    pub set_layouts: Vec<(u32, Vec<ReflectedBinding>)>,
    /// Vertex inputs ordered by location. Empty for other stages.
    pub attributes: Vec<VertexAttribute>,
}

impl ShaderReflection {
    pub fn binding(&self, set: u32, binding: u32) -> Option<&ReflectedBinding> {
        self.set_layouts
            .iter()
            .find(|(index, _)| *index == set)
            .and_then(|(_, bindings)| bindings.iter().find(|b| b.binding == binding))
    }

    pub fn binding_by_name(&self, name: &str) -> Option<&ReflectedBinding> {
        self.set_layouts
            .iter()
            .flat_map(|(_, bindings)| bindings.iter())
            .find(|b| b.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.name == name)
    }
}

/// Extracts binding and vertex-input metadata from SPIR-V.
pub struct ShaderReflector;

impl ShaderReflector {
    /// Convert little-endian SPIR-V bytes into words.
    pub fn words_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, GraphicsError> {
        if bytes.len() % 4 != 0 {
            return Err(GraphicsError::ShaderReflectionFailed(format!(
                "SPIR-V length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        let mut words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        if words.first() == Some(&SPIRV_MAGIC.swap_bytes()) {
            words.iter_mut().for_each(|w| *w = w.swap_bytes());
        }
        Ok(words)
    }

    /// Reflect the entry point `entry_point` of a SPIR-V module.
    ///
    /// Every declared resource is reported, referenced or not. When the module
    /// has a single entry point it is used regardless of its name.
    pub fn reflect(
        spirv: &[u32],
        stage: ShaderStage,
        entry_point: &str,
    ) -> Result<ShaderReflection, GraphicsError> {
        profile_function!();

        if spirv.len() < 5 || spirv[0] != SPIRV_MAGIC {
            return Err(GraphicsError::ShaderReflectionFailed(
                "missing SPIR-V header".to_string(),
            ));
        }

        let entry_points = spirq::ReflectConfig::new()
            .spv(spirv)
            .ref_all_rscs(true)
            .reflect()
            .map_err(|e| GraphicsError::ShaderReflectionFailed(format!("{e:?}")))?;

        let entry = entry_points
            .iter()
            .find(|ep| ep.name == entry_point)
            .or(if entry_points.len() == 1 {
                entry_points.first()
            } else {
                None
            })
            .ok_or_else(|| {
                GraphicsError::ShaderReflectionFailed(format!(
                    "entry point '{entry_point}' not found"
                ))
            })?;

        let mut sets: BTreeMap<u32, BTreeMap<u32, ReflectedBinding>> = BTreeMap::new();
        let mut attributes = Vec::new();

        for var in &entry.vars {
            match var {
                Variable::Descriptor {
                    name,
                    desc_bind,
                    desc_ty,
                    ty,
                    nbind,
                } => {
                    let kind = ResourceKind::from_spirq(desc_ty)?;
                    let (set, binding) = (desc_bind.set(), desc_bind.bind());
                    let members = if kind.is_buffer() {
                        flatten_struct(ty)
                    } else {
                        Vec::new()
                    };
                    let size = match kind {
                        ResourceKind::StorageBuffer => storage_buffer_size(ty, &members),
                        ResourceKind::UniformBuffer => ty
                            .nbyte()
                            .map(|n| n as u64)
                            .filter(|n| *n > 0)
                            .unwrap_or_else(|| members_span(&members)),
                        _ => 0,
                    };
                    let reflected = ReflectedBinding {
                        name: name
                            .clone()
                            .unwrap_or_else(|| format!("set{set}_binding{binding}")),
                        set,
                        binding,
                        kind,
                        count: (*nbind).max(1),
                        stages: stage.flag(),
                        size,
                        members,
                    };
                    sets.entry(set).or_default().insert(binding, reflected);
                }
                Variable::Input { name, location, ty } if stage == ShaderStage::Vertex => {
                    let (format, rows) = vertex_format(ty).ok_or_else(|| {
                        GraphicsError::ShaderReflectionFailed(format!(
                            "unsupported vertex input type {ty:?} at location {}",
                            location.loc()
                        ))
                    })?;
                    attributes.push(VertexAttribute {
                        name: name.clone().unwrap_or_default(),
                        location: location.loc(),
                        format,
                        rows,
                    });
                }
                _ => {}
            }
        }

        attributes.sort_by_key(|a| a.location);

        log::trace!(
            "Reflected {:?} entry point '{}': {} sets, {} attributes",
            stage,
            entry.name,
            sets.len(),
            attributes.len()
        );

        Ok(ShaderReflection {
            stage,
            entry_point: entry.name.clone(),
            set_layouts: sets
                .into_iter()
                .map(|(set, bindings)| (set, bindings.into_values().collect()))
                .collect(),
            attributes,
        })
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn flatten_struct(ty: &Type) -> Vec<ReflectedMember> {
    let mut out = Vec::new();
    match ty {
        Type::Struct(_) => flatten_into("", 0, ty, &mut out),
        // Bare arrays and scalars bound directly get a single unnamed member.
        other => out.push(ReflectedMember {
            name: String::new(),
            offset: 0,
            size: member_size(other) as u32,
        }),
    }
    out
}

fn flatten_into(prefix: &str, base: usize, ty: &Type, out: &mut Vec<ReflectedMember>) {
    let Type::Struct(st) = ty else {
        return;
    };
    for (index, member) in st.members.iter().enumerate() {
        let offset = base + member.offset.unwrap_or(0);
        match member.name.as_deref().filter(|n| !n.is_empty()) {
            Some(name) => flatten_member(&join(prefix, name), offset, &member.ty, out),
            // Anonymous wrapper structs are inlined into their parent.
            None if matches!(member.ty, Type::Struct(_)) => {
                flatten_into(prefix, offset, &member.ty, out)
            }
            None => flatten_member(&join(prefix, &format!("member{index}")), offset, &member.ty, out),
        }
    }
}

fn flatten_member(path: &str, offset: usize, ty: &Type, out: &mut Vec<ReflectedMember>) {
    match ty {
        Type::Struct(_) => flatten_into(path, offset, ty, out),
        Type::Array(arr) if matches!(*arr.element_ty, Type::Struct(_)) && arr.nelement.is_some() => {
            let count = arr.nelement.unwrap_or(0) as usize;
            let stride = arr.stride.or_else(|| arr.element_ty.nbyte()).unwrap_or(0);
            for i in 0..count {
                flatten_into(&format!("{path}[{i}]"), offset + i * stride, &arr.element_ty, out);
            }
        }
        _ => out.push(ReflectedMember {
            name: path.to_string(),
            offset: offset as u32,
            size: member_size(ty) as u32,
        }),
    }
}

fn member_size(ty: &Type) -> usize {
    match ty {
        Type::Array(arr) if arr.nelement.is_none() => {
            arr.stride.or_else(|| arr.element_ty.nbyte()).unwrap_or(0)
        }
        _ => ty.nbyte().unwrap_or(0),
    }
}

fn members_span(members: &[ReflectedMember]) -> u64 {
    members
        .iter()
        .map(|m| m.offset as u64 + m.size as u64)
        .max()
        .unwrap_or(0)
}

/// Runtime-sized storage buffers report zero from their type, so the size is
/// rebuilt from the flattened members.
fn storage_buffer_size(ty: &Type, members: &[ReflectedMember]) -> u64 {
    let span = members_span(members);
    if span > 0 {
        span
    } else {
        ty.nbyte().unwrap_or(0) as u64
    }
}

fn vertex_format(ty: &Type) -> Option<(VertexFormat, u32)> {
    match ty {
        Type::Scalar(scalar) => Some((scalar_format(scalar, 1)?, 1)),
        Type::Vector(vector) => Some((scalar_format(&vector.scalar_ty, vector.nscalar as u32)?, 1)),
        Type::Matrix(matrix) => Some((
            scalar_format(&matrix.vector_ty.scalar_ty, matrix.vector_ty.nscalar as u32)?,
            matrix.nvector as u32,
        )),
        _ => None,
    }
}

fn scalar_format(scalar: &ScalarType, components: u32) -> Option<VertexFormat> {
    use VertexFormat::*;

    let formats = match scalar {
        ScalarType::Float { bits: 32 } => [Float32, Float32x2, Float32x3, Float32x4],
        ScalarType::Integer {
            bits: 32,
            is_signed: true,
        } => [Sint32, Sint32x2, Sint32x3, Sint32x4],
        ScalarType::Integer {
            bits: 32,
            is_signed: false,
        } => [Uint32, Uint32x2, Uint32x3, Uint32x4],
        _ => return None,
    };
    formats.get(components.checked_sub(1)? as usize).copied()
}

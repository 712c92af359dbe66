//! Descriptor-set layouts merged from per-stage shader reflection.
//!
//! Every stage of a pipeline is reflected on its own. The
//! [`PipelineLayoutBuilder`] folds those reflections into one
//! [`DescriptorSetLayout`] per set index:
//!
//! ```text
//!  vertex:    set 0 { 0: Globals (uniform) }
//!  fragment:  set 0 { 0: Globals (uniform) }   set 1 { 0: Albedo (sampled) }
//!                         │                                 │
//!                         ▼                                 ▼
//!  merged:    set 0 { 0: Globals  VERTEX|FRAGMENT }  set 1 { 0: Albedo  FRAGMENT }
//! ```
//!
//! A (set, binding) declared by several stages must agree on name and kind.
//! Set indices need not be contiguous; absent sets are simply missing.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::backend::SetLayoutEntry;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::shader::{ReflectedBinding, ShaderReflection};
use crate::uniform::UniformLayout;

/// The bindings of one descriptor set, ordered by binding index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayout {
    set: u32,
    bindings: Vec<ReflectedBinding>,
}

impl DescriptorSetLayout {
    /// Create a layout from bindings with unique indices.
    pub fn new(set: u32, mut bindings: Vec<ReflectedBinding>) -> Result<Self, GraphicsError> {
        bindings.sort_by_key(|b| b.binding);
        if let Some(pair) = bindings.windows(2).find(|w| w[0].binding == w[1].binding) {
            return Err(GraphicsError::BindingConflict {
                set,
                binding: pair[0].binding,
                first: pair[0].describe(),
                second: pair[1].describe(),
            });
        }
        Ok(Self { set, bindings })
    }

    pub fn set(&self) -> u32 {
        self.set
    }

    pub fn bindings(&self) -> &[ReflectedBinding] {
        &self.bindings
    }

    pub fn binding(&self, binding: u32) -> Option<&ReflectedBinding> {
        self.bindings
            .binary_search_by_key(&binding, |b| b.binding)
            .ok()
            .map(|i| &self.bindings[i])
    }

    pub fn binding_by_name(&self, name: &str) -> Option<&ReflectedBinding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Entries for backend set-layout creation.
    pub fn entries(&self) -> Vec<SetLayoutEntry> {
        self.bindings
            .iter()
            .map(|b| SetLayoutEntry {
                binding: b.binding,
                kind: b.kind,
                count: b.count,
                stages: b.stages,
            })
            .collect()
    }
}

/// Merges reflected stages into per-set layouts.
#[derive(Debug, Default)]
pub struct PipelineLayoutBuilder {
    sets: BTreeMap<u32, BTreeMap<u32, ReflectedBinding>>,
}

impl PipelineLayoutBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every set of `reflection` into the builder.
    pub fn add_stage(&mut self, reflection: &ShaderReflection) -> Result<&mut Self, GraphicsError> {
        for (set, bindings) in &reflection.set_layouts {
            let merged = self.sets.entry(*set).or_default();
            for binding in bindings {
                match merged.get_mut(&binding.binding) {
                    None => {
                        merged.insert(binding.binding, binding.clone());
                    }
                    Some(existing) => merge_binding(existing, binding)?,
                }
            }
        }
        Ok(self)
    }

    /// Finish into layouts ordered by set index.
    pub fn build(self) -> BTreeMap<u32, DescriptorSetLayout> {
        self.sets
            .into_iter()
            .map(|(set, bindings)| {
                let layout = DescriptorSetLayout {
                    set,
                    bindings: bindings.into_values().collect(),
                };
                (set, layout)
            })
            .collect()
    }

    /// Merge all stages of one pipeline.
    pub fn merge(
        reflections: &[&ShaderReflection],
    ) -> Result<BTreeMap<u32, DescriptorSetLayout>, GraphicsError> {
        let mut builder = Self::new();
        for reflection in reflections {
            builder.add_stage(reflection)?;
        }
        Ok(builder.build())
    }

    /// Finish into one backend-backed [`UniformLayout`] per set.
    pub fn build_uniform_layouts(
        self,
        device: &Arc<GraphicsDevice>,
    ) -> Result<BTreeMap<u32, Arc<UniformLayout>>, GraphicsError> {
        self.build()
            .into_iter()
            .map(|(set, layout)| Ok((set, UniformLayout::new(device, layout)?)))
            .collect()
    }
}

fn merge_binding(
    existing: &mut ReflectedBinding,
    incoming: &ReflectedBinding,
) -> Result<(), GraphicsError> {
    if existing.name != incoming.name || existing.kind != incoming.kind {
        return Err(GraphicsError::BindingConflict {
            set: existing.set,
            binding: existing.binding,
            first: existing.describe(),
            second: incoming.describe(),
        });
    }

    existing.stages |= incoming.stages;

    if existing.count != incoming.count {
        log::warn!(
            "Binding '{}' (set {}, binding {}) has array count {} in one stage and {} in another, using the larger",
            existing.name,
            existing.set,
            existing.binding,
            existing.count,
            incoming.count
        );
        existing.count = existing.count.max(incoming.count);
    }

    if incoming.size > existing.size {
        existing.size = incoming.size;
        existing.members = incoming.members.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::{ResourceKind, ShaderStage, ShaderStageFlags};

    fn binding(set: u32, index: u32, name: &str, kind: ResourceKind, stage: ShaderStage) -> ReflectedBinding {
        ReflectedBinding {
            name: name.to_string(),
            set,
            binding: index,
            kind,
            count: 1,
            stages: stage.flag(),
            size: if kind.is_buffer() { 64 } else { 0 },
            members: Vec::new(),
        }
    }

    fn reflection(stage: ShaderStage, bindings: Vec<ReflectedBinding>) -> ShaderReflection {
        let mut sets: BTreeMap<u32, Vec<ReflectedBinding>> = BTreeMap::new();
        for b in bindings {
            sets.entry(b.set).or_default().push(b);
        }
        ShaderReflection {
            stage,
            entry_point: "main".to_string(),
            set_layouts: sets.into_iter().collect(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_shared_binding_unions_stages() {
        let vs = reflection(
            ShaderStage::Vertex,
            vec![binding(0, 0, "Globals", ResourceKind::UniformBuffer, ShaderStage::Vertex)],
        );
        let fs = reflection(
            ShaderStage::Fragment,
            vec![
                binding(0, 0, "Globals", ResourceKind::UniformBuffer, ShaderStage::Fragment),
                binding(1, 0, "Albedo", ResourceKind::CombinedImageSampler, ShaderStage::Fragment),
            ],
        );

        let layouts = PipelineLayoutBuilder::merge(&[&vs, &fs]).unwrap();
        assert_eq!(layouts.len(), 2);

        let globals = layouts[&0].binding(0).unwrap();
        assert_eq!(globals.stages, ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT);
        assert_eq!(layouts[&0].len(), 1);

        let albedo = layouts[&1].binding_by_name("Albedo").unwrap();
        assert_eq!(albedo.stages, ShaderStageFlags::FRAGMENT);
    }

    #[test]
    fn test_name_mismatch_conflicts() {
        let vs = reflection(
            ShaderStage::Vertex,
            vec![binding(0, 0, "Globals", ResourceKind::UniformBuffer, ShaderStage::Vertex)],
        );
        let fs = reflection(
            ShaderStage::Fragment,
            vec![binding(0, 0, "Material", ResourceKind::UniformBuffer, ShaderStage::Fragment)],
        );

        let err = PipelineLayoutBuilder::merge(&[&vs, &fs]).unwrap_err();
        match err {
            GraphicsError::BindingConflict { set, binding, first, second } => {
                assert_eq!((set, binding), (0, 0));
                assert!(first.contains("Globals"));
                assert!(second.contains("Material"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_kind_mismatch_conflicts() {
        let vs = reflection(
            ShaderStage::Vertex,
            vec![binding(0, 0, "Data", ResourceKind::UniformBuffer, ShaderStage::Vertex)],
        );
        let fs = reflection(
            ShaderStage::Fragment,
            vec![binding(0, 0, "Data", ResourceKind::StorageBuffer, ShaderStage::Fragment)],
        );
        assert!(matches!(
            PipelineLayoutBuilder::merge(&[&vs, &fs]),
            Err(GraphicsError::BindingConflict { .. })
        ));
    }

    #[test]
    fn test_count_mismatch_takes_larger() {
        let mut small = binding(0, 2, "Textures", ResourceKind::SampledImage, ShaderStage::Vertex);
        small.count = 4;
        let mut large = binding(0, 2, "Textures", ResourceKind::SampledImage, ShaderStage::Fragment);
        large.count = 8;

        let layouts = PipelineLayoutBuilder::merge(&[
            &reflection(ShaderStage::Vertex, vec![small]),
            &reflection(ShaderStage::Fragment, vec![large]),
        ])
        .unwrap();
        assert_eq!(layouts[&0].binding(2).unwrap().count, 8);
    }

    #[test]
    fn test_sparse_sets_and_binding_order() {
        let cs = reflection(
            ShaderStage::Compute,
            vec![
                binding(3, 5, "Output", ResourceKind::StorageImage, ShaderStage::Compute),
                binding(3, 1, "Params", ResourceKind::UniformBuffer, ShaderStage::Compute),
                binding(1, 0, "Input", ResourceKind::StorageBuffer, ShaderStage::Compute),
            ],
        );
        let layouts = PipelineLayoutBuilder::merge(&[&cs]).unwrap();
        assert_eq!(layouts.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert!(!layouts.contains_key(&2));

        let indices: Vec<u32> = layouts[&3].bindings().iter().map(|b| b.binding).collect();
        assert_eq!(indices, vec![1, 5]);
        assert_eq!(layouts[&3].entries()[1].kind, ResourceKind::StorageImage);
        assert!(layouts[&3].binding(2).is_none());
    }

    #[test]
    fn test_duplicate_binding_in_one_layout_rejected() {
        let result = DescriptorSetLayout::new(
            0,
            vec![
                binding(0, 0, "A", ResourceKind::UniformBuffer, ShaderStage::Vertex),
                binding(0, 0, "B", ResourceKind::UniformBuffer, ShaderStage::Vertex),
            ],
        );
        assert!(matches!(result, Err(GraphicsError::BindingConflict { .. })));
    }
}

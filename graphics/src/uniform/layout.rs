//! Immutable binding schema of one descriptor set.

use std::sync::Arc;

use crate::backend::SetLayoutHandle;
use crate::deletion::DeferredResource;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::pipeline::DescriptorSetLayout;
use crate::shader::ReflectedBinding;

use super::BindingRef;

/// A descriptor-set layout registered with the backend.
///
/// Layouts are shared as `Arc<UniformLayout>` by the pipeline that reflected
/// them and by every [`UniformWriter`](super::UniformWriter) built over them.
pub struct UniformLayout {
    device: Arc<GraphicsDevice>,
    layout: DescriptorSetLayout,
    handle: SetLayoutHandle,
}

impl UniformLayout {
    pub fn new(
        device: &Arc<GraphicsDevice>,
        layout: DescriptorSetLayout,
    ) -> Result<Arc<Self>, GraphicsError> {
        let handle = device.backend().create_set_layout(&layout.entries())?;
        log::debug!(
            "Created uniform layout for set {} with {} bindings",
            layout.set(),
            layout.len()
        );
        Ok(Arc::new(Self {
            device: Arc::clone(device),
            layout,
            handle,
        }))
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    /// Descriptor set index this layout describes.
    pub fn set(&self) -> u32 {
        self.layout.set()
    }

    pub fn handle(&self) -> SetLayoutHandle {
        self.handle
    }

    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    pub fn bindings(&self) -> &[ReflectedBinding] {
        self.layout.bindings()
    }

    pub fn binding(&self, binding: u32) -> Option<&ReflectedBinding> {
        self.layout.binding(binding)
    }

    pub fn binding_by_name(&self, name: &str) -> Option<&ReflectedBinding> {
        self.layout.binding_by_name(name)
    }

    /// Look up a binding by index or name.
    pub fn resolve(&self, binding: BindingRef<'_>) -> Option<&ReflectedBinding> {
        match binding {
            BindingRef::Index(index) => self.binding(index),
            BindingRef::Name(name) => self.binding_by_name(name),
        }
    }
}

impl Drop for UniformLayout {
    fn drop(&mut self) {
        self.device
            .defer_destroy(DeferredResource::SetLayout(self.handle));
    }
}

impl std::fmt::Debug for UniformLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformLayout")
            .field("set", &self.set())
            .field(
                "bindings",
                &self.bindings().iter().map(|b| b.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

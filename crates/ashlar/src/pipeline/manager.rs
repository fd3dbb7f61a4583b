//! Named store of pipeline variants
//!
//! Pipelines live in a slotmap; a name index and an insertion-order list sit
//! on top. Registering an existing name replaces the entry and drops the old
//! pipeline, which destroys its native objects. Frames still in flight may
//! have recorded the old pipeline, so the device is waited idle before any
//! registered pipeline is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use slotmap::{DefaultKey, SlotMap};

use crate::device::logical::DeviceShared;
use crate::error::{VulkanError, VulkanResult};
use crate::pipeline::compute::ComputePipeline;
use crate::pipeline::graphics::{GraphicsPipeline, RenderTarget};
use crate::pipeline::layout::PipelineLayout;
use crate::pipeline::ray_tracing::RayTracingPipeline;
use crate::shader::ShaderStageUnit;

/// Insertion-ordered map from name to value with stable storage keys
#[derive(Debug)]
pub struct NamedRegistry<T> {
    entries: SlotMap<DefaultKey, (String, T)>,
    by_name: HashMap<String, DefaultKey>,
    order: Vec<DefaultKey>,
}

impl<T> Default for NamedRegistry<T> {
    fn default() -> Self {
        Self { entries: SlotMap::new(), by_name: HashMap::new(), order: Vec::new() }
    }
}

impl<T> NamedRegistry<T> {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `name`, returning the entry it replaced
    pub fn insert(&mut self, name: impl Into<String>, value: T) -> (&mut T, Option<T>) {
        let name = name.into();
        let replaced = self.remove(&name);
        if replaced.is_some() {
            log::warn!("Replacing existing entry '{}'", name);
        }
        let key = self.entries.insert((name.clone(), value));
        self.by_name.insert(name, key);
        self.order.push(key);
        (&mut self.entries[key].1, replaced)
    }

    /// Remove and return the entry named `name`
    pub fn remove(&mut self, name: &str) -> Option<T> {
        let key = self.by_name.remove(name)?;
        self.order.retain(|&existing| existing != key);
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Entry by name
    pub fn get(&self, name: &str) -> Option<&T> {
        let key = self.by_name.get(name)?;
        self.entries.get(*key).map(|(_, value)| value)
    }

    /// Mutable entry by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut T> {
        let key = self.by_name.get(name)?;
        self.entries.get_mut(*key).map(|(_, value)| value)
    }

    /// Whether `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Run `wait_idle` if an entry named `name` exists and would be dropped
    pub fn idle_before_replacing(
        &self,
        name: &str,
        wait_idle: impl FnOnce() -> VulkanResult<()>,
    ) -> VulkanResult<()> {
        if self.contains(name) {
            log::debug!("Waiting for the device before replacing '{}'", name);
            wait_idle()?;
        }
        Ok(())
    }

    /// Names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().filter_map(|key| self.entries.get(*key)).map(|(name, _)| name.as_str())
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.order
            .iter()
            .filter_map(|key| self.entries.get(*key))
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Kind of a stored pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// [`GraphicsPipeline`]
    Graphics,
    /// [`ComputePipeline`]
    Compute,
    /// [`RayTracingPipeline`]
    RayTracing,
}

/// One stored pipeline
pub enum PipelineVariant {
    /// Graphics pipeline
    Graphics(GraphicsPipeline),
    /// Compute pipeline
    Compute(ComputePipeline),
    /// Ray tracing pipeline
    RayTracing(RayTracingPipeline),
}

impl PipelineVariant {
    /// Discriminant
    pub fn kind(&self) -> PipelineKind {
        match self {
            Self::Graphics(_) => PipelineKind::Graphics,
            Self::Compute(_) => PipelineKind::Compute,
            Self::RayTracing(_) => PipelineKind::RayTracing,
        }
    }

    /// Pipeline layout
    pub fn layout(&self) -> &PipelineLayout {
        match self {
            Self::Graphics(pipeline) => pipeline.base().layout(),
            Self::Compute(pipeline) => pipeline.base().layout(),
            Self::RayTracing(pipeline) => pipeline.layout(),
        }
    }

    /// Record the variant's bind commands
    pub fn bind(&self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        match self {
            Self::Graphics(pipeline) => pipeline.bind(command_buffer),
            Self::Compute(pipeline) => pipeline.bind(command_buffer),
            Self::RayTracing(pipeline) => pipeline.bind(command_buffer),
        }
    }

    /// Graphics payload
    pub fn as_graphics(&self) -> Option<&GraphicsPipeline> {
        match self {
            Self::Graphics(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    /// Mutable graphics payload
    pub fn as_graphics_mut(&mut self) -> Option<&mut GraphicsPipeline> {
        match self {
            Self::Graphics(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    /// Compute payload
    pub fn as_compute(&self) -> Option<&ComputePipeline> {
        match self {
            Self::Compute(pipeline) => Some(pipeline),
            _ => None,
        }
    }

    /// Ray tracing payload
    pub fn as_ray_tracing(&self) -> Option<&RayTracingPipeline> {
        match self {
            Self::RayTracing(pipeline) => Some(pipeline),
            _ => None,
        }
    }
}

/// Which name is the "main" pipeline of each kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MainPipelines {
    graphics: Option<String>,
    compute: Option<String>,
    ray_tracing: Option<String>,
}

impl MainPipelines {
    fn slot(&mut self, kind: PipelineKind) -> &mut Option<String> {
        match kind {
            PipelineKind::Graphics => &mut self.graphics,
            PipelineKind::Compute => &mut self.compute,
            PipelineKind::RayTracing => &mut self.ray_tracing,
        }
    }

    /// Name of the main pipeline of `kind`
    pub fn get(&self, kind: PipelineKind) -> Option<&str> {
        match kind {
            PipelineKind::Graphics => self.graphics.as_deref(),
            PipelineKind::Compute => self.compute.as_deref(),
            PipelineKind::RayTracing => self.ray_tracing.as_deref(),
        }
    }

    /// Record that `name` was registered as `kind`
    ///
    /// A replaced name stops being main for any other kind.
    pub fn register(&mut self, name: &str, kind: PipelineKind, main: bool) {
        for other in [PipelineKind::Graphics, PipelineKind::Compute, PipelineKind::RayTracing] {
            let slot = self.slot(other);
            if other != kind && slot.as_deref() == Some(name) {
                *slot = None;
            }
        }
        if main {
            *self.slot(kind) = Some(name.to_string());
        }
    }

    /// Forget `name`
    pub fn unregister(&mut self, name: &str) {
        for kind in [PipelineKind::Graphics, PipelineKind::Compute, PipelineKind::RayTracing] {
            let slot = self.slot(kind);
            if slot.as_deref() == Some(name) {
                *slot = None;
            }
        }
    }
}

/// Named registry of pipelines with per-kind main pipeline
#[derive(Default)]
pub struct PipelineManager {
    pipelines: NamedRegistry<PipelineVariant>,
    main: MainPipelines,
}

impl PipelineManager {
    /// Empty manager
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&mut self, name: String, variant: PipelineVariant, main: bool) -> &mut PipelineVariant {
        self.main.register(&name, variant.kind(), main);
        let (stored, replaced) = self.pipelines.insert(name, variant);
        if let Some(old) = replaced {
            log::debug!("Released previous {:?} pipeline", old.kind());
        }
        stored
    }

    /// Build and register a graphics pipeline
    pub fn create_graphics(
        &mut self,
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        target: RenderTarget,
        main: bool,
    ) -> VulkanResult<&mut GraphicsPipeline> {
        let name = name.into();
        self.pipelines.idle_before_replacing(&name, || device.wait_idle())?;
        let pipeline = GraphicsPipeline::new(device, name.clone(), units, target)?;
        self.store(name.clone(), PipelineVariant::Graphics(pipeline), main)
            .as_graphics_mut()
            .ok_or(VulkanError::PipelineNotFound(name))
    }

    /// Build and register a compute pipeline
    pub fn create_compute(
        &mut self,
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<&ComputePipeline> {
        let name = name.into();
        self.pipelines.idle_before_replacing(&name, || device.wait_idle())?;
        let pipeline = ComputePipeline::new(device, name.clone(), units)?;
        self.store(name.clone(), PipelineVariant::Compute(pipeline), main)
            .as_compute()
            .ok_or(VulkanError::PipelineNotFound(name))
    }

    /// Build and register a ray tracing pipeline
    pub fn create_ray_tracing(
        &mut self,
        device: &Arc<DeviceShared>,
        name: impl Into<String>,
        units: &[ShaderStageUnit],
        main: bool,
    ) -> VulkanResult<&RayTracingPipeline> {
        let name = name.into();
        self.pipelines.idle_before_replacing(&name, || device.wait_idle())?;
        let pipeline = RayTracingPipeline::new(device, name.clone(), units)?;
        self.store(name.clone(), PipelineVariant::RayTracing(pipeline), main)
            .as_ray_tracing()
            .ok_or(VulkanError::PipelineNotFound(name))
    }

    /// Pipeline of any kind
    pub fn get(&self, name: &str) -> Option<&PipelineVariant> {
        self.pipelines.get(name)
    }

    /// Graphics pipeline by name
    pub fn graphics(&self, name: &str) -> Option<&GraphicsPipeline> {
        self.get(name).and_then(PipelineVariant::as_graphics)
    }

    /// Mutable graphics pipeline by name
    pub fn graphics_mut(&mut self, name: &str) -> Option<&mut GraphicsPipeline> {
        self.pipelines.get_mut(name).and_then(PipelineVariant::as_graphics_mut)
    }

    /// Compute pipeline by name
    pub fn compute(&self, name: &str) -> Option<&ComputePipeline> {
        self.get(name).and_then(PipelineVariant::as_compute)
    }

    /// Ray tracing pipeline by name
    pub fn ray_tracing(&self, name: &str) -> Option<&RayTracingPipeline> {
        self.get(name).and_then(PipelineVariant::as_ray_tracing)
    }

    /// Main graphics pipeline
    pub fn main_graphics(&self) -> Option<&GraphicsPipeline> {
        self.main.get(PipelineKind::Graphics).and_then(|name| self.graphics(name))
    }

    /// Mutable main graphics pipeline
    pub fn main_graphics_mut(&mut self) -> Option<&mut GraphicsPipeline> {
        let name = self.main.get(PipelineKind::Graphics)?.to_string();
        self.graphics_mut(&name)
    }

    /// Main compute pipeline
    pub fn main_compute(&self) -> Option<&ComputePipeline> {
        self.main.get(PipelineKind::Compute).and_then(|name| self.compute(name))
    }

    /// Main ray tracing pipeline
    pub fn main_ray_tracing(&self) -> Option<&RayTracingPipeline> {
        self.main.get(PipelineKind::RayTracing).and_then(|name| self.ray_tracing(name))
    }

    /// Bind the pipeline registered as `name`
    pub fn bind(&self, name: &str, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.get(name)
            .ok_or_else(|| VulkanError::PipelineNotFound(name.to_string()))?
            .bind(command_buffer)
    }

    /// Drop the pipeline registered as `name` once the device is idle
    pub fn remove(&mut self, device: &DeviceShared, name: &str) -> VulkanResult<bool> {
        self.pipelines.idle_before_replacing(name, || device.wait_idle())?;
        self.main.unregister(name);
        Ok(self.pipelines.remove(name).is_some())
    }

    /// Registered names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pipelines.names()
    }

    /// Number of pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether no pipeline is registered
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        id: u32,
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_reregistration_releases_previous_entry() {
        let drops = Arc::new(AtomicUsize::new(0));
        let mut registry = NamedRegistry::new();
        registry.insert("main", Tracked { id: 1, drops: Arc::clone(&drops) });

        let (stored, replaced) = registry.insert("main", Tracked { id: 2, drops: Arc::clone(&drops) });
        assert_eq!(stored.id, 2);
        assert_eq!(replaced.map(|old| old.id), Some(1));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("main").unwrap().id, 2);
    }

    #[test]
    fn test_idle_wait_only_when_entry_is_replaced() {
        let mut registry = NamedRegistry::new();
        registry.insert("main", 1_u32);
        let waits = AtomicUsize::new(0);
        let wait = || {
            waits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        registry.idle_before_replacing("other", wait).unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 0);
        registry.idle_before_replacing("main", wait).unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_idle_wait_blocks_replacement() {
        let mut registry = NamedRegistry::new();
        registry.insert("main", 1_u32);
        let result = registry.idle_before_replacing("main", || Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST)));
        assert!(matches!(result, Err(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))));
        assert_eq!(registry.get("main"), Some(&1));
    }

    #[test]
    fn test_names_keep_insertion_order() {
        let mut registry = NamedRegistry::new();
        for name in ["shadow", "main", "post"] {
            registry.insert(name, name.len());
        }
        registry.insert("shadow", 0);
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["main", "post", "shadow"]);
        assert!(registry.remove("main").is_some());
        assert!(registry.remove("main").is_none());
        assert_eq!(registry.iter().map(|(_, value)| *value).collect::<Vec<_>>(), vec![4, 0]);
    }

    #[test]
    fn test_lookup_missing_name() {
        let mut registry: NamedRegistry<u8> = NamedRegistry::new();
        assert!(registry.get("absent").is_none());
        assert!(registry.get_mut("absent").is_none());
        assert!(!registry.contains("absent"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registry_drops_everything_on_teardown() {
        let drops = Arc::new(AtomicUsize::new(0));
        {
            let mut registry = NamedRegistry::new();
            registry.insert("a", Tracked { id: 1, drops: Arc::clone(&drops) });
            registry.insert("b", Tracked { id: 2, drops: Arc::clone(&drops) });
        }
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_main_tracking_follows_replacement() {
        let mut main = MainPipelines::default();
        main.register("forward", PipelineKind::Graphics, true);
        main.register("cull", PipelineKind::Compute, true);
        assert_eq!(main.get(PipelineKind::Graphics), Some("forward"));

        main.register("forward", PipelineKind::Compute, false);
        assert_eq!(main.get(PipelineKind::Graphics), None);
        assert_eq!(main.get(PipelineKind::Compute), Some("cull"));

        main.register("forward", PipelineKind::Graphics, false);
        assert_eq!(main.get(PipelineKind::Graphics), None);

        main.unregister("cull");
        assert_eq!(main.get(PipelineKind::Compute), None);
    }

    #[test]
    fn test_manager_lookup_on_empty() {
        let manager = PipelineManager::new();
        assert!(manager.get("x").is_none());
        assert!(manager.main_graphics().is_none());
        assert!(matches!(manager.bind("x", vk::CommandBuffer::null()), Err(VulkanError::PipelineNotFound(_))));
        assert!(manager.is_empty());
    }
}

use derivative::Derivative;
use scratch_containers::prelude::{ContainerErrors, InternTable};
use tracing::{debug, warn};
use vkgal::ash::vk;
use vkgal::backend::Backend;
use vkgal::descriptor::{ResourceRef, SetLayoutDescription};

use crate::descriptor_allocator::{DescriptorAllocatorCreateInfo, DescriptorSetAllocator};
use crate::error::ScratchError;

/// Index of a layout inside a [`LayoutRegistry`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutHandle(u16);

impl LayoutHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRegistryCreateInfo {
    /// Distinct layouts the registry can hold
    pub capacity: usize,
    /// Used for every allocator the registry creates
    pub allocator: DescriptorAllocatorCreateInfo,
}

impl Default for LayoutRegistryCreateInfo {
    fn default() -> Self {
        Self {
            capacity: 32,
            allocator: DescriptorAllocatorCreateInfo::default(),
        }
    }
}

impl LayoutRegistryCreateInfo {
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn allocator(mut self, allocator: DescriptorAllocatorCreateInfo) -> Self {
        self.allocator = allocator;
        self
    }
}

/// One [`DescriptorSetAllocator`] per structurally distinct layout.
///
/// Layouts are never removed, so handles stay valid for the life of the registry.
#[derive(Derivative)]
#[derivative(Debug(bound = ""))]
pub struct LayoutRegistry<B: Backend> {
    #[derivative(Debug = "ignore")]
    backend: B,
    allocators: InternTable<SetLayoutDescription, DescriptorSetAllocator<B>>,
    allocator_info: DescriptorAllocatorCreateInfo,
}

impl<B: Backend> LayoutRegistry<B> {
    pub fn new(backend: B, create_info: LayoutRegistryCreateInfo) -> Result<Self, ScratchError> {
        if create_info.capacity == 0 {
            return Err(ScratchError::InvalidConfig("capacity must be at least 1"));
        }
        if create_info.capacity > u16::MAX as usize + 1 {
            return Err(ScratchError::InvalidConfig(
                "capacity must fit in a 16 bit layout handle",
            ));
        }
        create_info.allocator.validate()?;
        Ok(Self {
            backend,
            allocators: InternTable::new(create_info.capacity),
            allocator_info: create_info.allocator,
        })
    }

    pub fn len(&self) -> usize {
        self.allocators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocators.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.allocators.capacity()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.allocator_info.frames_in_flight
    }

    /// Handle of the allocator for `description`, creating it the first time the layout is seen
    pub fn get_or_create(
        &mut self,
        description: &SetLayoutDescription,
    ) -> Result<LayoutHandle, ScratchError> {
        if let Some(index) = self.allocators.find(description) {
            return Ok(LayoutHandle(index as u16));
        }
        let backend = &self.backend;
        let info = &self.allocator_info;
        let next = self.allocators.len();
        let result = self
            .allocators
            .get_or_insert_with(description.clone(), |key| {
                let info = info
                    .clone()
                    .name(format!("{} (layout {})", info.name, next));
                DescriptorSetAllocator::new(backend.clone(), key.clone(), &info)
            });
        match result {
            Ok((index, inserted)) => {
                if inserted {
                    debug!(
                        "Registered layout {} with {} bindings",
                        index,
                        description.binding_count()
                    );
                }
                Ok(LayoutHandle(index as u16))
            }
            Err(ScratchError::Container(ContainerErrors::CapacityExceeded { capacity })) => {
                warn!("Layout registry is full ({} layouts)", capacity);
                Err(ScratchError::RegistryFull { capacity })
            }
            Err(e) => Err(e),
        }
    }

    pub fn get(&self, handle: LayoutHandle) -> Result<&DescriptorSetAllocator<B>, ScratchError> {
        self.allocators
            .get(handle.index())
            .ok_or(ScratchError::InvalidLayoutHandle(handle.0))
    }

    pub fn get_mut(
        &mut self,
        handle: LayoutHandle,
    ) -> Result<&mut DescriptorSetAllocator<B>, ScratchError> {
        self.allocators
            .get_mut(handle.index())
            .ok_or(ScratchError::InvalidLayoutHandle(handle.0))
    }

    pub fn description(&self, handle: LayoutHandle) -> Result<&SetLayoutDescription, ScratchError> {
        self.allocators
            .key(handle.index())
            .ok_or(ScratchError::InvalidLayoutHandle(handle.0))
    }

    pub fn alloc(
        &mut self,
        handle: LayoutHandle,
        refs: &[ResourceRef],
    ) -> Result<vk::DescriptorSet, ScratchError> {
        self.get_mut(handle)?.alloc(refs)
    }

    /// Advance every allocator by one frame
    pub fn begin_frame(&mut self) {
        self.allocators
            .values_mut()
            .for_each(|allocator| allocator.begin_frame());
    }

    /// Forget snapshots referencing matching resources in every allocator
    pub fn invalidate<F: Fn(&ResourceRef) -> bool>(&mut self, predicate: F) -> usize {
        self.allocators
            .values_mut()
            .map(|allocator| allocator.invalidate(&predicate))
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LayoutHandle, &DescriptorSetAllocator<B>)> {
        self.allocators
            .iter()
            .map(|(index, _, allocator)| (LayoutHandle(index as u16), allocator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vkgal::ash::vk::Handle;
    use vkgal::backend::TestBackend;
    use vkgal::descriptor::{BindingDescription, BindingType, SetLayoutBuilder};
    use vkgal::GalError;

    fn ubo_layout(binding: u32) -> SetLayoutDescription {
        SetLayoutBuilder::default()
            .add_binding(binding, BindingType::UniformBuffer)
            .build()
            .unwrap()
    }

    #[test]
    fn test_structural_dedup() {
        let backend = TestBackend::new();
        let mut registry =
            LayoutRegistry::new(backend.clone(), LayoutRegistryCreateInfo::default()).unwrap();
        let a = registry.get_or_create(&ubo_layout(0)).unwrap();
        // built separately, from per stage reflection
        let reflected = SetLayoutBuilder::default()
            .add_stage_bindings(
                vk::ShaderStageFlags::ALL,
                &[BindingDescription::new(0, BindingType::UniformBuffer)],
            )
            .build()
            .unwrap();
        let b = registry.get_or_create(&reflected).unwrap();
        assert_eq!(a, b);
        assert_eq!(registry.len(), 1);
        assert_eq!(backend.counters().layouts_created, 1);

        let c = registry.get_or_create(&ubo_layout(1)).unwrap();
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.description(c).unwrap(), &ubo_layout(1));
    }

    #[test]
    fn test_registry_full() {
        let backend = TestBackend::new();
        let mut registry = LayoutRegistry::new(
            backend.clone(),
            LayoutRegistryCreateInfo::default().capacity(1),
        )
        .unwrap();
        registry.get_or_create(&ubo_layout(0)).unwrap();
        assert!(matches!(
            registry.get_or_create(&ubo_layout(1)),
            Err(ScratchError::RegistryFull { capacity: 1 })
        ));
        // lookups of known layouts still work
        assert!(registry.get_or_create(&ubo_layout(0)).is_ok());
        assert_eq!(backend.counters().layouts_created, 1);
    }

    #[test]
    fn test_alloc_and_begin_frame() {
        let backend = TestBackend::new();
        let mut registry =
            LayoutRegistry::new(backend.clone(), LayoutRegistryCreateInfo::default()).unwrap();
        let first = registry.get_or_create(&ubo_layout(0)).unwrap();
        let second = registry.get_or_create(&ubo_layout(1)).unwrap();
        let refs = [ResourceRef::buffer(vk::Buffer::from_raw(1), 0, 64)];
        registry.alloc(first, &refs).unwrap();
        registry.alloc(second, &refs).unwrap();
        registry.begin_frame();
        for (_, allocator) in registry.iter() {
            assert_eq!(allocator.current_slot(), 1);
            assert_eq!(allocator.stats().slots_in_use, 1);
        }
        registry.begin_frame();
        for (_, allocator) in registry.iter() {
            assert_eq!(allocator.stats().slots_in_use, 0);
        }
        assert_eq!(
            registry.invalidate(|r| r.references_buffer(vk::Buffer::from_raw(1))),
            2
        );
    }

    #[test]
    fn test_invalid_handle() {
        let backend = TestBackend::new();
        let mut registry =
            LayoutRegistry::new(backend, LayoutRegistryCreateInfo::default()).unwrap();
        assert!(matches!(
            registry.alloc(LayoutHandle(3), &[]),
            Err(ScratchError::InvalidLayoutHandle(3))
        ));
    }

    #[test]
    fn test_failed_creation_is_not_registered() {
        let backend = TestBackend::new();
        let mut registry =
            LayoutRegistry::new(backend.clone(), LayoutRegistryCreateInfo::default()).unwrap();
        backend.fail_after(0);
        assert!(matches!(
            registry.get_or_create(&ubo_layout(0)),
            Err(ScratchError::Gal(GalError::InjectedFailure))
        ));
        assert!(registry.is_empty());
        assert!(registry.get_or_create(&ubo_layout(0)).is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let backend = TestBackend::new();
        assert!(matches!(
            LayoutRegistry::new(
                backend.clone(),
                LayoutRegistryCreateInfo::default().capacity(0)
            ),
            Err(ScratchError::InvalidConfig(_))
        ));
        assert!(matches!(
            LayoutRegistry::new(
                backend,
                LayoutRegistryCreateInfo::default()
                    .allocator(DescriptorAllocatorCreateInfo::default().frames_in_flight(0))
            ),
            Err(ScratchError::InvalidConfig(_))
        ));
    }
}

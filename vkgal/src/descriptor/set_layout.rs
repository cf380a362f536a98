use std::collections::BTreeMap;

use ash::vk;

use super::{BindingDescription, BindingType, ResourceRef};
use crate::GalError;

/// Upper bound of bindings a single binding table layout may declare
pub const MAX_BINDINGS: usize = 16;

/// Structural description of a binding table.
///
/// Two descriptions compare equal field by field, which is how identical layouts requested from
/// different call sites end up sharing one allocator. Bindings are kept sorted by binding index.
///
/// Resource references written against a description are laid out binding-major: a binding
/// with an array size of `k` consumes `k` consecutive references.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SetLayoutDescription {
    bindings: Vec<BindingDescription>,
}

impl SetLayoutDescription {
    pub fn bindings(&self) -> &[BindingDescription] {
        &self.bindings
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Total number of resource references a table of this layout holds
    pub fn descriptor_count(&self) -> usize {
        self.bindings
            .iter()
            .map(|binding| binding.count as usize)
            .sum()
    }

    /// Pool sizes needed to allocate `max_sets` tables of this layout
    pub fn pool_sizes(&self, max_sets: u32) -> Result<Vec<vk::DescriptorPoolSize>, GalError> {
        let mut counts: BTreeMap<i32, u32> = BTreeMap::new();
        for binding in self.bindings.iter() {
            let count = counts.entry(binding.descriptor_type().as_raw()).or_default();
            *count = count
                .checked_add(binding.count)
                .ok_or(GalError::SizeOverflow)?;
        }
        counts
            .into_iter()
            .map(|(ty, count)| {
                Ok(vk::DescriptorPoolSize {
                    ty: vk::DescriptorType::from_raw(ty),
                    descriptor_count: count.checked_mul(max_sets).ok_or(GalError::SizeOverflow)?,
                })
            })
            .collect()
    }

    /// Pair every binding with the slice of `resources` that belongs to it
    pub fn split<'a>(
        &'a self,
        resources: &'a [ResourceRef],
    ) -> impl Iterator<Item = (&'a BindingDescription, &'a [ResourceRef])> + 'a {
        let mut start = 0usize;
        self.bindings.iter().map(move |binding| {
            let end = (start + binding.count as usize).min(resources.len());
            let chunk = &resources[start.min(end)..end];
            start = end;
            (binding, chunk)
        })
    }

    /// Verify `resources` can be written into a table of this layout
    pub fn check(&self, resources: &[ResourceRef]) -> Result<(), GalError> {
        let expected = self.descriptor_count();
        if resources.len() != expected {
            return Err(GalError::ResourceCountMismatch {
                expected,
                got: resources.len(),
            });
        }
        let mut index = 0usize;
        for (binding, chunk) in self.split(resources) {
            for resource in chunk {
                if !binding.ty.accepts(resource) {
                    return Err(GalError::ResourceTypeMismatch {
                        index,
                        binding: binding.binding,
                        expected: binding.descriptor_type(),
                    });
                }
                index += 1;
            }
        }
        Ok(())
    }
}

/// Builds a [`SetLayoutDescription`] either from explicit declarations or from per stage
/// reflection output.
///
/// The same binding index may be declared several times (e.g. once by the vertex stage and once
/// by the fragment stage); declarations are merged by OR-ing their stage visibility, as long as
/// type and array size agree.
#[derive(Clone, Debug, Default)]
pub struct SetLayoutBuilder {
    bindings: Vec<BindingDescription>,
}

impl SetLayoutBuilder {
    /// Adds a single descriptor binding visible to every stage
    pub fn add_binding(mut self, binding: u32, ty: BindingType) -> Self {
        self.bindings.push(BindingDescription::new(binding, ty));
        self
    }

    pub fn add_raw_binding(mut self, bindings: &[BindingDescription]) -> Self {
        self.bindings.extend_from_slice(bindings);
        self
    }

    /// Adds bindings discovered in a single shader stage; their visibility is set to `stage`
    pub fn add_stage_bindings(
        mut self,
        stage: vk::ShaderStageFlags,
        bindings: &[BindingDescription],
    ) -> Self {
        self.bindings
            .extend(bindings.iter().map(|binding| binding.stages(stage)));
        self
    }

    pub fn build(self) -> Result<SetLayoutDescription, GalError> {
        let mut merged: BTreeMap<u32, BindingDescription> = BTreeMap::new();
        for binding in self.bindings {
            if binding.count == 0 {
                return Err(GalError::InvalidBinding {
                    binding: binding.binding,
                    reason: "array size must be at least one",
                });
            }
            if binding.stages.is_empty() {
                return Err(GalError::InvalidBinding {
                    binding: binding.binding,
                    reason: "no shader stage can see it",
                });
            }
            match merged.get_mut(&binding.binding) {
                Some(existing) => {
                    if existing.ty != binding.ty || existing.count != binding.count {
                        return Err(GalError::BindingConflict {
                            binding: binding.binding,
                        });
                    }
                    existing.stages |= binding.stages;
                }
                None => {
                    merged.insert(binding.binding, binding);
                }
            }
        }
        if merged.len() > MAX_BINDINGS {
            return Err(GalError::TooManyBindings {
                max: MAX_BINDINGS,
                got: merged.len(),
            });
        }
        Ok(SetLayoutDescription {
            bindings: merged.into_values().collect(),
        })
    }
}

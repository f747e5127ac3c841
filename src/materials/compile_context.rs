// src/materials/compile_context.rs
//! Shader index allocation.
//!
//! One context per [`crate::asset::Assets`]: it owns the next-index counter
//! and the material-type → index map, so two asset sets never share indices
//! and tests stay independent of each other.

use std::collections::HashMap;

use parking_lot::Mutex;

use super::material::MaterialType;

#[derive(Debug, Default)]
struct IndexState {
    next_index: u64,
    types: HashMap<MaterialType, u64>,
}

#[derive(Debug, Default)]
pub struct MaterialCompileContext {
    state: Mutex<IndexState>,
}

impl MaterialCompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for a material of `material_type`; `None` (materials with custom
    /// snippets) always allocates a fresh one.
    pub fn assign(&self, material_type: Option<MaterialType>) -> u64 {
        let mut state = self.state.lock();
        match material_type {
            Some(ty) => {
                if let Some(index) = state.types.get(&ty) {
                    return *index;
                }
                let index = state.next_index;
                state.next_index += 1;
                state.types.insert(ty, index);
                index
            }
            None => {
                let index = state.next_index;
                state.next_index += 1;
                index
            }
        }
    }

    pub fn allocated(&self) -> u64 {
        self.state.lock().next_index
    }

    pub fn known_types(&self) -> usize {
        self.state.lock().types.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::materials::{Blending, Property, Shading};

    fn material_type(properties: Vec<Property>) -> MaterialType {
        MaterialType {
            properties,
            uniforms: Vec::new(),
            samplers: Vec::new(),
            shading: Shading::Lit,
            blending: Blending::Opaque,
            two_sided: false,
        }
    }

    #[test]
    fn test_equal_types_share_index() {
        let context = MaterialCompileContext::new();
        let a = context.assign(Some(material_type(vec![Property::Color])));
        let b = context.assign(Some(material_type(vec![Property::Color, Property::Metallic])));
        let c = context.assign(Some(material_type(vec![Property::Color])));
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(context.known_types(), 2);
    }

    #[test]
    fn test_untyped_always_fresh() {
        let context = MaterialCompileContext::new();
        let a = context.assign(None);
        let b = context.assign(None);
        assert_ne!(a, b);
        assert_eq!(context.allocated(), 2);
        assert_eq!(context.known_types(), 0);
    }

    #[test]
    fn test_contexts_are_independent() {
        let first = MaterialCompileContext::new();
        let second = MaterialCompileContext::new();
        first.assign(None);
        first.assign(None);
        assert_eq!(second.assign(None), 0);
    }
}

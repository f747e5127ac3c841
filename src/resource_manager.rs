// src/resource_manager.rs
//! Named, shared resource registries.
//!
//! A [`ResourceContainer`] is the root owner of a family of assets
//! (materials, textures, meshes, models, effects). Entries are `Arc`s, so a
//! mesh or instance keeps its material alive even after the registry drops
//! it. The map itself sits behind a `parking_lot::RwLock` so background
//! loaders can insert while the render thread reads.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

pub struct ResourceContainer<T> {
    kind: &'static str,
    resources: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> ResourceContainer<T> {
    /// `kind` names the family in error messages ("material", "texture", ...).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            resources: RwLock::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Insert a resource. Fails if the name is taken.
    pub fn add(&self, name: impl Into<String>, resource: Arc<T>) -> Result<Arc<T>> {
        let name = name.into();
        let mut resources = self.resources.write();
        if resources.contains_key(&name) {
            return Err(Error::already_exists(self.kind, name));
        }
        resources.insert(name, resource.clone());
        Ok(resource)
    }

    /// Look a resource up by name.
    pub fn get(&self, name: &str) -> Result<Arc<T>> {
        self.try_get(name)
            .ok_or_else(|| Error::not_found(self.kind, name))
    }

    pub fn try_get(&self, name: &str) -> Option<Arc<T>> {
        self.resources.read().get(name).cloned()
    }

    /// Return the existing entry or insert the one produced by `make`.
    pub fn get_or_try_insert_with<F>(&self, name: &str, make: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        if let Some(existing) = self.try_get(name) {
            return Ok(existing);
        }
        let created = Arc::new(make()?);
        let mut resources = self.resources.write();
        Ok(resources
            .entry(name.to_string())
            .or_insert(created)
            .clone())
    }

    pub fn remove(&self, name: &str) -> Option<Arc<T>> {
        self.resources.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Sorted names, for stable iteration.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every entry.
    pub fn values(&self) -> Vec<Arc<T>> {
        self.resources.read().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.resources.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceErrorKind;

    #[test]
    fn test_duplicate_add_is_named_error() {
        let textures = ResourceContainer::new("texture");
        textures.add("albedo", Arc::new(1u32)).unwrap();
        match textures.add("albedo", Arc::new(2u32)).unwrap_err() {
            Error::Resource { kind, name, reason } => {
                assert_eq!(kind, "texture");
                assert_eq!(name, "albedo");
                assert_eq!(reason, ResourceErrorKind::AlreadyExists);
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(*textures.get("albedo").unwrap(), 1);
    }

    #[test]
    fn test_unknown_lookup_is_named_error() {
        let meshes: ResourceContainer<u32> = ResourceContainer::new("mesh");
        let err = meshes.get("cube").unwrap_err();
        assert_eq!(err.to_string(), "mesh resource cube: no such resource");
    }

    #[test]
    fn test_removed_entry_outlives_registry() {
        let materials = ResourceContainer::new("material");
        let kept = materials.add("stone", Arc::new(String::from("stone"))).unwrap();
        assert!(materials.remove("stone").is_some());
        assert!(!materials.contains("stone"));
        assert_eq!(kept.as_str(), "stone");
    }

    #[test]
    fn test_get_or_insert_runs_factory_once() {
        let effects = ResourceContainer::new("effect");
        let mut calls = 0;
        for _ in 0..3 {
            effects
                .get_or_try_insert_with("sparks", || {
                    calls += 1;
                    Ok(7u8)
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        assert_eq!(effects.names(), vec!["sparks".to_string()]);
    }
}

// src/scene.rs
//! The scene: camera, lights and the instances the renderer draws.
//!
//! Instances are owned here and referenced by passes only for the duration
//! of a frame. [`Scene::update`] advances instance state once per frame and
//! drops instances that died (killed, or finished effects flagged for
//! removal).

use glam::Vec3;

use crate::camera::Camera;
use crate::gpu::RenderDevice;
use crate::instances::{Instance, InstanceId};
use crate::lighting::Lighting;

pub struct Scene {
    pub camera: Camera,
    pub lighting: Lighting,
    instances: Vec<Instance>,
    next_id: u64,
}

impl Scene {
    pub fn new(device: &mut dyn RenderDevice, light_reserve: usize) -> Self {
        Self {
            camera: Camera::default(),
            lighting: Lighting::new(device, light_reserve),
            instances: Vec::new(),
            next_id: 1,
        }
    }

    /// Take ownership of `instance` and give it a fresh id.
    pub fn add(&mut self, mut instance: Instance) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        instance.set_id(id);
        log::debug!("Scene: added {} as {:?}", instance.name, id);
        self.instances.push(instance);
        id
    }

    pub fn remove(&mut self, id: InstanceId) -> Option<Instance> {
        let slot = self.instances.iter().position(|i| i.id() == id)?;
        Some(self.instances.remove(slot))
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id() == id)
    }

    pub fn get_mut(&mut self, id: InstanceId) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id() == id)
    }

    /// First instance called `name`.
    pub fn find(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut [Instance] {
        &mut self.instances
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Instances within `radius` of `point`.
    pub fn query_sphere(&self, point: Vec3, radius: f32) -> impl Iterator<Item = &Instance> {
        self.instances
            .iter()
            .filter(move |i| i.position.distance_squared(point) <= radius * radius)
    }

    /// Advance animations and attachments, then drop dead instances.
    /// Returns how many were removed.
    pub fn update(&mut self, dt: f32) -> usize {
        for instance in &mut self.instances {
            instance.update(dt);
        }
        let before = self.instances.len();
        self.instances.retain(|i| !i.is_dead());
        let removed = before - self.instances.len();
        if removed > 0 {
            log::debug!("Scene: removed {removed} finished instances");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.instances.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AbstractModel, Model};
    use glam::UVec2;
    use std::sync::Arc;
    use crate::gpu::headless::HeadlessDevice;

    fn prop(name: &str) -> Instance {
        Instance::model(Arc::new(AbstractModel::Plain(Model::new(name, Vec::new(), Vec::new()))))
    }

    #[test]
    fn test_ids_are_unique_and_lookup_works() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let mut scene = Scene::new(&mut device, 4);
        let a = scene.add(prop("a"));
        let b = scene.add(prop("b").with_position(Vec3::X * 10.0));
        assert_ne!(a, b);
        assert_eq!(scene.get(b).unwrap().name, "b");
        assert_eq!(scene.query_sphere(Vec3::ZERO, 1.0).count(), 1);
        assert_eq!(scene.remove(a).unwrap().name, "a");
        assert!(scene.get(a).is_none());
    }

    #[test]
    fn test_update_drops_killed_instances() {
        let mut device = HeadlessDevice::new(UVec2::ONE);
        let mut scene = Scene::new(&mut device, 4);
        let doomed = scene.add(prop("doomed"));
        scene.add(prop("kept"));
        scene.get_mut(doomed).unwrap().kill();
        assert_eq!(scene.update(0.016), 1);
        assert_eq!(scene.len(), 1);
        assert!(scene.find("kept").is_some());
    }
}

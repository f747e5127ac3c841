// src/lighting/light_container.rs
//! Contiguous light arrays with dirty-tracked uploads.

use std::collections::HashMap;

use crate::gpu::{BufferDesc, BufferId, BufferKind, RenderDevice};

use super::lights::GpuLight;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightId(pub u32);

/// Lights of one type, packed in insertion order.
///
/// Erasing shifts every later light down one slot, so the array handed to
/// the GPU stays contiguous and keeps the relative order of the survivors.
/// Edits only mark the container dirty; [`LightContainer::update`] is the one
/// place the array reaches the device.
#[derive(Debug)]
pub struct LightContainer<T: GpuLight> {
    lights: Vec<T>,
    ids: Vec<LightId>,
    index: HashMap<LightId, usize>,
    next_id: u32,
    reserve: usize,
    buffer: Option<BufferId>,
    capacity: usize,
    dirty: bool,
    uploads: usize,
}

impl<T: GpuLight> LightContainer<T> {
    pub fn new(reserve: usize) -> Self {
        Self {
            lights: Vec::with_capacity(reserve),
            ids: Vec::with_capacity(reserve),
            index: HashMap::with_capacity(reserve),
            next_id: 0,
            reserve: reserve.max(1),
            buffer: None,
            capacity: 0,
            dirty: true,
            uploads: 0,
        }
    }

    pub fn add(&mut self, light: T) -> LightId {
        let id = LightId(self.next_id);
        self.next_id += 1;
        self.index.insert(id, self.lights.len());
        self.lights.push(light);
        self.ids.push(id);
        self.dirty = true;
        id
    }

    /// Remove a light; later lights move down one slot.
    pub fn erase(&mut self, id: LightId) -> Option<T> {
        let slot = self.index.remove(&id)?;
        let light = self.lights.remove(slot);
        self.ids.remove(slot);
        for index in self.index.values_mut() {
            if *index > slot {
                *index -= 1;
            }
        }
        self.dirty = true;
        Some(light)
    }

    pub fn get(&self, id: LightId) -> Option<&T> {
        self.index.get(&id).map(|&i| &self.lights[i])
    }

    /// Mutable access; marks the container dirty.
    pub fn get_mut(&mut self, id: LightId) -> Option<&mut T> {
        let slot = *self.index.get(&id)?;
        self.dirty = true;
        self.lights.get_mut(slot)
    }

    pub fn index_of(&self, id: LightId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn contains(&self, id: LightId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn lights(&self) -> &[T] {
        &self.lights
    }

    /// Ids in array order.
    pub fn ids(&self) -> &[LightId] {
        &self.ids
    }

    pub fn reserve(&mut self, additional: usize) {
        self.lights.reserve(additional);
        self.ids.reserve(additional);
        self.index.reserve(additional);
        self.reserve = self.reserve.max(self.lights.len() + additional);
    }

    pub fn clear(&mut self) {
        self.lights.clear();
        self.ids.clear();
        self.index.clear();
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Number of uploads performed so far.
    pub fn upload_count(&self) -> usize {
        self.uploads
    }

    /// Upload the array if anything changed since the last upload.
    /// Returns whether an upload happened.
    pub fn update(&mut self, device: &mut dyn RenderDevice) -> bool {
        if !self.dirty {
            return false;
        }
        if self.buffer.is_none() || self.lights.len() > self.capacity {
            if let Some(old) = self.buffer.take() {
                device.destroy_buffer(old);
            }
            self.capacity = self.lights.len().max(self.reserve).next_power_of_two();
            let size = (self.capacity * std::mem::size_of::<T>()) as u64;
            self.buffer = Some(device.create_buffer(&BufferDesc {
                label: T::BINDING.to_string(),
                size,
                kind: BufferKind::Storage,
            }));
            log::debug!("Allocated {} buffer for {} lights", T::BINDING, self.capacity);
        }
        if let (Some(buffer), false) = (self.buffer, self.lights.is_empty()) {
            device.write_buffer(buffer, 0, bytemuck::cast_slice(&self.lights));
        }
        self.dirty = false;
        self.uploads += 1;
        log::debug!("Uploaded {} {}", self.lights.len(), T::BINDING);
        true
    }

    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(buffer) = self.buffer.take() {
            device.destroy_buffer(buffer);
        }
        self.capacity = 0;
        self.dirty = true;
    }
}

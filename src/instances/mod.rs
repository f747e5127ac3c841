// src/instances/mod.rs
//! Drawable scene entities.
//!
//! An [`Instance`] places a model, an animated skeletal model, a batch of
//! GPU-instanced copies or a free-standing particle effect in the world.
//! Any instance can also carry effect attachments that follow its transform.

pub mod skeletal;

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};

use crate::fx::EffectInstance;
use crate::materials::Material;
use crate::model::{AbstractModel, Mesh};
use crate::shader::ModelShader;

pub use skeletal::SkeletalInstance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

/// An effect riding on another instance, offset in its local space.
#[derive(Debug, Clone)]
pub struct EffectAttachment {
    pub offset: Vec3,
    pub effect: EffectInstance,
}

#[derive(Debug, Clone)]
pub enum InstanceKind {
    Model(Arc<AbstractModel>),
    Skeletal(SkeletalInstance),
    /// Copies of one model; per-copy transforms are relative to the instance.
    Instanced {
        model: Arc<AbstractModel>,
        transforms: Vec<Mat4>,
        skeleton: Option<SkeletalInstance>,
    },
    Effect(EffectInstance),
}

#[derive(Debug, Clone)]
pub struct Instance {
    id: InstanceId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub visible: bool,
    /// Written by the colour-picker pass.
    pub picking_color: Vec4,
    /// Drop the instance once its effect finished.
    pub remove_when_done: bool,
    kind: InstanceKind,
    attachments: Vec<EffectAttachment>,
    killed: bool,
}

impl Instance {
    fn with_kind(name: impl Into<String>, kind: InstanceKind) -> Self {
        Self {
            id: InstanceId(0),
            name: name.into(),
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            visible: true,
            picking_color: Vec4::ZERO,
            remove_when_done: false,
            kind,
            attachments: Vec::new(),
            killed: false,
        }
    }

    /// Skeletal models get an animation player, others are drawn as-is.
    pub fn model(model: Arc<AbstractModel>) -> Self {
        let name = model.name().to_string();
        let kind = match SkeletalInstance::new(model.clone()) {
            Ok(skeleton) => InstanceKind::Skeletal(skeleton),
            Err(_) => InstanceKind::Model(model),
        };
        Self::with_kind(name, kind)
    }

    pub fn instanced(model: Arc<AbstractModel>, transforms: Vec<Mat4>) -> Self {
        let name = model.name().to_string();
        let skeleton = SkeletalInstance::new(model.clone()).ok();
        Self::with_kind(
            name,
            InstanceKind::Instanced {
                model,
                transforms,
                skeleton,
            },
        )
    }

    pub fn effect(effect: EffectInstance) -> Self {
        let mut instance = Self::with_kind(effect.name().to_string(), InstanceKind::Effect(effect));
        instance.remove_when_done = true;
        instance.position = match &instance.kind {
            InstanceKind::Effect(effect) => effect.position(),
            _ => Vec3::ZERO,
        };
        instance
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: InstanceId) {
        self.id = id;
    }

    pub fn kind(&self) -> &InstanceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut InstanceKind {
        &mut self.kind
    }

    /// Topology tag the instance's variants are compiled for.
    pub fn shader_type(&self) -> ModelShader {
        match &self.kind {
            InstanceKind::Model(_) => ModelShader::Plain,
            InstanceKind::Skeletal(_) => ModelShader::Skeletal,
            InstanceKind::Instanced { skeleton: None, .. } => ModelShader::Instanced,
            InstanceKind::Instanced { skeleton: Some(_), .. } => ModelShader::SkeletalInstanced,
            InstanceKind::Effect(_) => ModelShader::Effect,
        }
    }

    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    pub fn abstract_model(&self) -> Option<&Arc<AbstractModel>> {
        match &self.kind {
            InstanceKind::Model(model) | InstanceKind::Instanced { model, .. } => Some(model),
            InstanceKind::Skeletal(skeleton) => Some(skeleton.model()),
            InstanceKind::Effect(_) => None,
        }
    }

    /// (mesh, material) pairs this instance draws; empty for effects.
    pub fn parts(&self) -> Vec<(&Arc<Mesh>, &Arc<Material>)> {
        self.abstract_model()
            .map(|model| model.model().parts().collect())
            .unwrap_or_default()
    }

    pub fn skeleton(&self) -> Option<&SkeletalInstance> {
        match &self.kind {
            InstanceKind::Skeletal(skeleton) => Some(skeleton),
            InstanceKind::Instanced { skeleton, .. } => skeleton.as_ref(),
            _ => None,
        }
    }

    pub fn skeleton_mut(&mut self) -> Option<&mut SkeletalInstance> {
        match &mut self.kind {
            InstanceKind::Skeletal(skeleton) => Some(skeleton),
            InstanceKind::Instanced { skeleton, .. } => skeleton.as_mut(),
            _ => None,
        }
    }

    /// Skinning matrices for skeletal topologies.
    pub fn bone_transforms(&self) -> Option<&[Mat4]> {
        self.skeleton().map(SkeletalInstance::bone_transforms)
    }

    /// World transforms of every copy of an instanced model.
    pub fn instance_transforms(&self) -> Option<Vec<Mat4>> {
        match &self.kind {
            InstanceKind::Instanced { transforms, .. } => {
                let base = self.model_matrix();
                Some(transforms.iter().map(|t| base * *t).collect())
            }
            _ => None,
        }
    }

    /// Number of copies a draw of this instance renders.
    pub fn instance_count(&self) -> u32 {
        match &self.kind {
            InstanceKind::Instanced { transforms, .. } => transforms.len() as u32,
            _ => 1,
        }
    }

    pub fn effect_instance(&self) -> Option<&EffectInstance> {
        match &self.kind {
            InstanceKind::Effect(effect) => Some(effect),
            _ => None,
        }
    }

    pub fn effect_instance_mut(&mut self) -> Option<&mut EffectInstance> {
        match &mut self.kind {
            InstanceKind::Effect(effect) => Some(effect),
            _ => None,
        }
    }

    pub fn attach_effect(&mut self, offset: Vec3, effect: EffectInstance) -> &mut Self {
        self.attachments.push(EffectAttachment { offset, effect });
        self.place_attachments();
        self
    }

    pub fn attachments(&self) -> &[EffectAttachment] {
        &self.attachments
    }

    pub fn attachments_mut(&mut self) -> &mut [EffectAttachment] {
        &mut self.attachments
    }

    pub fn kill(&mut self) {
        self.killed = true;
    }

    /// Killed, or a finished effect flagged for removal.
    pub fn is_dead(&self) -> bool {
        if self.killed {
            return true;
        }
        self.remove_when_done && self.effect_instance().is_some_and(EffectInstance::is_done)
    }

    fn place_attachments(&mut self) {
        let (position, rotation, scale) = (self.position, self.rotation, self.scale);
        for attachment in &mut self.attachments {
            attachment.effect.set_rotation(rotation);
            attachment
                .effect
                .set_position(position + rotation * (scale * attachment.offset));
        }
    }

    /// Per-frame state: animation playback and effect placement.
    /// Particles themselves are advanced by the effect renderer.
    pub fn update(&mut self, dt: f32) {
        if let Some(skeleton) = self.skeleton_mut() {
            skeleton.update(dt);
        }
        let (position, rotation) = (self.position, self.rotation);
        if let InstanceKind::Effect(effect) = &mut self.kind {
            if effect.position() != position {
                effect.set_position(position);
            }
            if effect.rotation() != rotation {
                effect.set_rotation(rotation);
            }
        }
        self.place_attachments();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn plain(name: &str) -> Arc<AbstractModel> {
        Arc::new(AbstractModel::Plain(Model::new(name, Vec::new(), Vec::new())))
    }

    #[test]
    fn test_shader_type_follows_kind() {
        assert_eq!(Instance::model(plain("crate")).shader_type(), ModelShader::Plain);
        let forest = Instance::instanced(plain("tree"), vec![Mat4::IDENTITY; 3]);
        assert_eq!(forest.shader_type(), ModelShader::Instanced);
        assert_eq!(forest.instance_count(), 3);
    }

    #[test]
    fn test_instance_transforms_are_relative_to_the_instance() {
        let row = Instance::instanced(plain("post"), vec![Mat4::from_translation(Vec3::X)])
            .with_position(Vec3::new(0.0, 0.0, 5.0));
        let world = row.instance_transforms().unwrap();
        assert_eq!(world[0].w_axis.truncate(), Vec3::new(1.0, 0.0, 5.0));
        assert!(Instance::model(plain("x")).instance_transforms().is_none());
    }

    #[test]
    fn test_kill_marks_dead() {
        let mut instance = Instance::model(plain("crate"));
        assert!(!instance.is_dead());
        instance.kill();
        assert!(instance.is_dead());
    }
}

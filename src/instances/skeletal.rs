// src/instances/skeletal.rs
//! Animation playback for skeletal model instances.

use std::sync::Arc;

use glam::Mat4;

use crate::context::ensure;
use crate::error::{Error, Result};
use crate::model::skeleton::skin_matrices;
use crate::model::{AbstractModel, SkeletalModel};

#[derive(Debug, Clone)]
pub struct SkeletalInstance {
    model: Arc<AbstractModel>,
    animation: Option<usize>,
    time: f32,
    paused: bool,
    looping: bool,
    bone_transforms: Vec<Mat4>,
}

impl SkeletalInstance {
    pub fn new(model: Arc<AbstractModel>) -> Result<Self> {
        ensure!(model.is_skeletal(), "model {} has no skeleton", model.name());
        let mut instance = Self {
            model,
            animation: None,
            time: 0.0,
            paused: false,
            looping: true,
            bone_transforms: Vec::new(),
        };
        instance.pose();
        Ok(instance)
    }

    pub fn model(&self) -> &Arc<AbstractModel> {
        &self.model
    }

    fn skeleton(&self) -> Option<&SkeletalModel> {
        self.model.as_skeletal()
    }

    /// Start `name` from the beginning.
    pub fn play(&mut self, name: &str) -> Result<()> {
        let index = self
            .skeleton()
            .and_then(|s| s.animations.iter().position(|a| a.name == name))
            .ok_or_else(|| Error::not_found("animation", name))?;
        self.animation = Some(index);
        self.time = 0.0;
        self.paused = false;
        self.pose();
        Ok(())
    }

    pub fn stop(&mut self) {
        self.animation = None;
        self.time = 0.0;
        self.pose();
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }

    pub fn current_animation(&self) -> Option<&str> {
        let index = self.animation?;
        self.skeleton()
            .and_then(|s| s.animations.get(index))
            .map(|a| a.name.as_str())
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    /// Advance playback and recompute the skinning matrices.
    pub fn update(&mut self, dt: f32) {
        if self.paused || self.animation.is_none() {
            return;
        }
        let duration = self
            .animation
            .and_then(|i| self.skeleton().and_then(|s| s.animations.get(i)))
            .map_or(0.0, |a| a.duration);
        self.time += dt;
        if duration > 0.0 && self.time > duration {
            self.time = if self.looping { self.time % duration } else { duration };
        }
        self.pose();
    }

    fn pose(&mut self) {
        let Some(skeleton) = self.model.as_skeletal() else {
            return;
        };
        let animation = self.animation.and_then(|i| skeleton.animations.get(i));
        let time = self.time;
        self.bone_transforms = skin_matrices(&skeleton.bones, &skeleton.bone_trees, |bone| {
            match animation.and_then(|a| a.node(bone.index)) {
                Some(node) => node.transform_at(bone, time),
                None => bone.node_transform,
            }
        });
    }

    /// Skinning matrices indexed by joint.
    pub fn bone_transforms(&self) -> &[Mat4] {
        &self.bone_transforms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Animation, AnimationNode, Bone, BoneTree, KeyFrame, Model};
    use glam::Vec3;
    use std::collections::HashMap;

    fn walker() -> Arc<AbstractModel> {
        let mut root = Bone::new(0, "hip", Mat4::IDENTITY);
        root.joint_index = Some(0);
        let mut node = AnimationNode::new(0);
        node.positions = vec![
            KeyFrame::new(Vec3::ZERO, 0.0),
            KeyFrame::new(Vec3::new(0.0, 2.0, 0.0), 2.0),
        ];
        Arc::new(AbstractModel::Skeletal(SkeletalModel {
            model: Model::new("walker", Vec::new(), Vec::new()),
            bone_indices: HashMap::from([("hip".to_string(), 0)]),
            bones: vec![root],
            bone_trees: vec![BoneTree::new(0)],
            animations: vec![Animation {
                name: "bob".into(),
                duration: 2.0,
                ticks_per_second: 1.0,
                nodes: vec![node],
            }],
        }))
    }

    #[test]
    fn test_playback_moves_joint_and_loops() {
        let mut instance = SkeletalInstance::new(walker()).unwrap();
        assert_eq!(instance.bone_transforms(), &[Mat4::IDENTITY]);
        instance.play("bob").unwrap();
        instance.update(1.0);
        assert_eq!(instance.bone_transforms()[0].w_axis.y, 1.0);
        instance.update(1.5);
        assert!((instance.time() - 0.5).abs() < 1e-6);
        assert_eq!(instance.current_animation(), Some("bob"));
    }

    #[test]
    fn test_unknown_animation_and_plain_model() {
        let mut instance = SkeletalInstance::new(walker()).unwrap();
        assert!(instance.play("run").unwrap_err().is_resource());
        let plain = Arc::new(AbstractModel::Plain(Model::new("box", Vec::new(), Vec::new())));
        assert!(SkeletalInstance::new(plain).is_err());
    }
}

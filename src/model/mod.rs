// src/model/mod.rs
//! Models: meshes paired with the materials they are drawn with.

pub mod mesh;
pub mod skeleton;

use std::collections::HashMap;
use std::sync::Arc;

use crate::materials::Material;

pub use mesh::Mesh;
pub use skeleton::{Animation, AnimationNode, Bone, BoneTree, KeyFrame};

/// Static model: mesh `i` is drawn with material `i`.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub meshes: Vec<Arc<Mesh>>,
    pub materials: Vec<Arc<Material>>,
}

impl Model {
    pub fn new(name: impl Into<String>, meshes: Vec<Arc<Mesh>>, materials: Vec<Arc<Material>>) -> Self {
        debug_assert_eq!(meshes.len(), materials.len());
        Self {
            name: name.into(),
            meshes,
            materials,
        }
    }

    /// (mesh, material) pairs in draw order.
    pub fn parts(&self) -> impl Iterator<Item = (&Arc<Mesh>, &Arc<Material>)> {
        self.meshes.iter().zip(&self.materials)
    }
}

#[derive(Debug, Clone)]
pub struct SkeletalModel {
    pub model: Model,
    pub bones: Vec<Bone>,
    pub bone_indices: HashMap<String, usize>,
    pub bone_trees: Vec<BoneTree>,
    pub animations: Vec<Animation>,
}

impl SkeletalModel {
    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animations.iter().find(|a| a.name == name)
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bone_indices.get(name).and_then(|&i| self.bones.get(i))
    }

    /// Number of bones reachable from the hierarchy roots.
    pub fn hierarchy_size(&self) -> usize {
        self.bone_trees.iter().map(BoneTree::len).sum()
    }
}

#[derive(Debug, Clone)]
pub enum AbstractModel {
    Plain(Model),
    Skeletal(SkeletalModel),
}

impl AbstractModel {
    pub fn model(&self) -> &Model {
        match self {
            AbstractModel::Plain(model) => model,
            AbstractModel::Skeletal(skeletal) => &skeletal.model,
        }
    }

    pub fn name(&self) -> &str {
        &self.model().name
    }

    pub fn as_skeletal(&self) -> Option<&SkeletalModel> {
        match self {
            AbstractModel::Skeletal(skeletal) => Some(skeletal),
            AbstractModel::Plain(_) => None,
        }
    }

    pub fn is_skeletal(&self) -> bool {
        matches!(self, AbstractModel::Skeletal(_))
    }
}

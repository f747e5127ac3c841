// src/model/skeleton.rs
//! Bones, bone hierarchies and keyframe animations.

use glam::{Mat4, Quat, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    pub index: usize,
    pub name: String,
    /// Rest transform relative to the parent bone.
    pub node_transform: Mat4,
    /// Inverse bind matrix; identity for bones that are not skin joints.
    pub offset_matrix: Mat4,
    /// Position in the skin's joint list, which is what vertex joints index.
    pub joint_index: Option<usize>,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Bone {
    pub fn new(index: usize, name: impl Into<String>, node_transform: Mat4) -> Self {
        let (scale, rotation, position) = node_transform.to_scale_rotation_translation();
        Self {
            index,
            name: name.into(),
            node_transform,
            offset_matrix: Mat4::IDENTITY,
            joint_index: None,
            position,
            rotation,
            scale,
        }
    }
}

/// A bone index with its child subtrees.
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTree {
    pub bone: usize,
    pub children: Vec<BoneTree>,
}

impl BoneTree {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            children: Vec::new(),
        }
    }

    pub fn add(&mut self, bone: usize) -> &mut BoneTree {
        self.children.push(BoneTree::new(bone));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Number of nodes in the tree, root included.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(BoneTree::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyFrame<T> {
    pub value: T,
    pub time: f32,
}

impl<T> KeyFrame<T> {
    pub fn new(value: T, time: f32) -> Self {
        Self { value, time }
    }
}

/// The keyframe tracks driving one bone.
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationNode {
    pub bone: usize,
    pub positions: Vec<KeyFrame<Vec3>>,
    pub rotations: Vec<KeyFrame<Quat>>,
    pub scales: Vec<KeyFrame<Vec3>>,
}

/// Index of the keyframe pair around `time` and the blend factor between them.
fn segment<T>(frames: &[KeyFrame<T>], time: f32) -> Option<(usize, usize, f32)> {
    let last = frames.len().checked_sub(1)?;
    if last == 0 || time <= frames[0].time {
        return Some((0, 0, 0.0));
    }
    if time >= frames[last].time {
        return Some((last, last, 0.0));
    }
    let next = frames.iter().position(|f| f.time > time)?;
    let prev = next - 1;
    let span = frames[next].time - frames[prev].time;
    let t = if span > 0.0 { (time - frames[prev].time) / span } else { 0.0 };
    Some((prev, next, t))
}

impl AnimationNode {
    pub fn new(bone: usize) -> Self {
        Self {
            bone,
            positions: Vec::new(),
            rotations: Vec::new(),
            scales: Vec::new(),
        }
    }

    pub fn position_at(&self, time: f32) -> Option<Vec3> {
        let (a, b, t) = segment(&self.positions, time)?;
        Some(self.positions[a].value.lerp(self.positions[b].value, t))
    }

    pub fn rotation_at(&self, time: f32) -> Option<Quat> {
        let (a, b, t) = segment(&self.rotations, time)?;
        Some(self.rotations[a].value.slerp(self.rotations[b].value, t).normalize())
    }

    pub fn scale_at(&self, time: f32) -> Option<Vec3> {
        let (a, b, t) = segment(&self.scales, time)?;
        Some(self.scales[a].value.lerp(self.scales[b].value, t))
    }

    /// Local transform at `time`; missing tracks fall back to the bone's rest pose.
    pub fn transform_at(&self, bone: &Bone, time: f32) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            self.scale_at(time).unwrap_or(bone.scale),
            self.rotation_at(time).unwrap_or(bone.rotation),
            self.position_at(time).unwrap_or(bone.position),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    pub name: String,
    /// Seconds.
    pub duration: f32,
    pub ticks_per_second: f32,
    pub nodes: Vec<AnimationNode>,
}

impl Animation {
    pub fn node(&self, bone: usize) -> Option<&AnimationNode> {
        self.nodes.iter().find(|n| n.bone == bone)
    }
}

/// Final skinning matrices for the given bone hierarchy, indexed by joint.
///
/// `local` yields each bone's local transform (animated or rest pose).
pub fn skin_matrices<F>(bones: &[Bone], trees: &[BoneTree], mut local: F) -> Vec<Mat4>
where
    F: FnMut(&Bone) -> Mat4,
{
    let joint_count = bones
        .iter()
        .filter_map(|b| b.joint_index)
        .max()
        .map_or(0, |max| max + 1);
    let mut result = vec![Mat4::IDENTITY; joint_count];

    fn walk<F: FnMut(&Bone) -> Mat4>(
        tree: &BoneTree,
        parent: Mat4,
        bones: &[Bone],
        local: &mut F,
        result: &mut [Mat4],
    ) {
        let Some(bone) = bones.get(tree.bone) else {
            return;
        };
        let global = parent * local(bone);
        if let Some(joint) = bone.joint_index {
            result[joint] = global * bone.offset_matrix;
        }
        for child in &tree.children {
            walk(child, global, bones, local, result);
        }
    }

    for tree in trees {
        walk(tree, Mat4::IDENTITY, bones, &mut local, &mut result);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframes_interpolate_and_clamp() {
        let mut node = AnimationNode::new(0);
        node.positions = vec![
            KeyFrame::new(Vec3::ZERO, 0.0),
            KeyFrame::new(Vec3::new(2.0, 0.0, 0.0), 1.0),
        ];
        assert_eq!(node.position_at(0.5), Some(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(node.position_at(-1.0), Some(Vec3::ZERO));
        assert_eq!(node.position_at(3.0), Some(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(node.rotation_at(0.5), None);
    }

    #[test]
    fn test_skin_matrices_follow_hierarchy() {
        let mut root = Bone::new(0, "root", Mat4::from_translation(Vec3::X));
        root.joint_index = Some(0);
        let mut child = Bone::new(1, "child", Mat4::from_translation(Vec3::Y));
        child.joint_index = Some(1);
        child.offset_matrix = Mat4::from_translation(-Vec3::new(1.0, 1.0, 0.0));
        let bones = vec![root, child];
        let mut tree = BoneTree::new(0);
        tree.add(1);
        assert_eq!(tree.len(), 2);

        let skin = skin_matrices(&bones, &[tree], |b| b.node_transform);
        assert_eq!(skin.len(), 2);
        assert_eq!(skin[0], Mat4::from_translation(Vec3::X));
        // Rest pose times inverse bind is identity.
        assert!(skin[1].abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }
}
